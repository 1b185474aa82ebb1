use crate::core::record::{AlignInfo, Record};
use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel as channel;
use flate2::read::MultiGzDecoder;
use gzp::deflate::{Bgzf, Mgzip};
use gzp::par::decompress::ParDecompressBuilder;
use memchr::memchr_iter;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::thread;

const GZIP_READ_BUF: usize = 8 * 1024 * 1024;
const STREAM_BATCH: usize = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    Plain,
    Gzip,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Fastq,
    Sam,
}

/// Where the records come from. `path == None` means stdin, which is
/// non-restartable and therefore never prefix-sampled.
#[derive(Clone, Debug)]
pub struct Input {
    pub path: Option<PathBuf>,
    pub format: Format,
    pub kind: InputKind,
}

impl Input {
    pub fn byte_size(&self) -> Option<u64> {
        let path = self.path.as_ref()?;
        std::fs::metadata(path).ok().map(|m| m.len())
    }
}

pub fn detect_input_kind(path: &Path) -> Result<InputKind> {
    if let Some(ext) = path.extension().and_then(|s| s.to_str())
        && ext.eq_ignore_ascii_case("gz")
    {
        return Ok(InputKind::Gzip);
    }
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut magic = [0u8; 2];
    let n = file
        .read(&mut magic)
        .with_context(|| "failed to read magic bytes")?;
    if n == 2 && magic == [0x1f, 0x8b] {
        Ok(InputKind::Gzip)
    } else {
        Ok(InputKind::Plain)
    }
}

/// Pick the record format from the file name, looking through a
/// trailing `.gz`.
pub fn detect_format(path: &Path) -> Option<Format> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    let stem = name.strip_suffix(".gz").unwrap_or(&name);
    if stem.ends_with(".fastq") || stem.ends_with(".fq") {
        Some(Format::Fastq)
    } else if stem.ends_with(".sam") {
        Some(Format::Sam)
    } else {
        None
    }
}

struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        // SAFETY: read-only file mapping.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| "mmap failed")?;
        Ok(Self { mmap })
    }
}

/// Read adapter over a private mapping so plain-file input skips
/// buffered file reads.
struct MmapCursor {
    source: MmapSource,
    pos: usize,
}

impl Read for MmapCursor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes = &self.source.mmap[self.pos..];
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Clone, Copy, Debug)]
enum GzipVariant {
    Standard,
    Mgzip,
    Bgzf,
}

fn detect_gzip_variant(path: &Path) -> Result<GzipVariant> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut header = [0u8; 20];
    let n = file
        .read(&mut header)
        .with_context(|| "failed to read gzip header")?;
    if n < 14 || header[0] != 0x1f || header[1] != 0x8b || header[3] & 4 == 0 {
        return Ok(GzipVariant::Standard);
    }
    match (header[12], header[13]) {
        (b'B', b'C') => Ok(GzipVariant::Bgzf),
        (b'I', b'G') => Ok(GzipVariant::Mgzip),
        _ => Ok(GzipVariant::Standard),
    }
}

fn open_gzip_reader(path: &Path, threads: usize) -> Result<Box<dyn Read + Send>> {
    let variant = detect_gzip_variant(path)?;
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let reader: Box<dyn Read + Send> = match variant {
        GzipVariant::Bgzf if threads > 1 => Box::new(
            ParDecompressBuilder::<Bgzf>::new()
                .num_threads(threads)
                .map_err(|e| anyhow!("failed to size decompressor pool: {e}"))?
                .from_reader(reader),
        ),
        GzipVariant::Mgzip if threads > 1 => Box::new(
            ParDecompressBuilder::<Mgzip>::new()
                .num_threads(threads)
                .map_err(|e| anyhow!("failed to size decompressor pool: {e}"))?
                .from_reader(reader),
        ),
        _ => Box::new(MultiGzDecoder::new(reader)),
    };
    Ok(reader)
}

fn open_reader(input: &Input, threads: usize) -> Result<Box<dyn BufRead + Send>> {
    match (&input.path, input.kind) {
        (None, _) => Ok(Box::new(BufReader::new(std::io::stdin()))),
        (Some(path), InputKind::Plain) => {
            // Zero-length files cannot be mapped; surface them as an
            // immediately-exhausted stream instead.
            let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if len == 0 {
                return Ok(Box::new(BufReader::new(std::io::empty())));
            }
            Ok(Box::new(BufReader::new(MmapCursor {
                source: MmapSource::open(path)?,
                pos: 0,
            })))
        }
        (Some(path), InputKind::Gzip) => Ok(Box::new(BufReader::with_capacity(
            GZIP_READ_BUF,
            open_gzip_reader(path, threads)?,
        ))),
    }
}

/// Exact record count of a gzipped FASTQ: stream the whole member and
/// count newlines, four lines per record.
pub fn count_gzip_records(path: &Path, threads: usize) -> Result<u64> {
    let mut reader = open_gzip_reader(path, threads)?;
    let mut buf = vec![0u8; GZIP_READ_BUF];
    let mut newlines = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("gzip decompression error in {}", path.display()))?;
        if n == 0 {
            break;
        }
        newlines += memchr_iter(b'\n', &buf[..n]).count() as u64;
    }
    Ok(newlines / 4)
}

/// A finite, non-restartable record producer. `next_record` also
/// reports the serialized byte length for the sampling estimator;
/// `skip_record` discards one record without building it.
pub trait RecordSource {
    fn next_record(&mut self) -> Result<Option<(Record, usize)>>;
    fn skip_record(&mut self) -> Result<bool>;
}

pub fn open_source(input: &Input, threads: usize) -> Result<Box<dyn RecordSource + Send>> {
    let reader = open_reader(input, threads)?;
    Ok(match input.format {
        Format::Fastq => Box::new(FastqSource::new(reader)),
        Format::Sam => Box::new(SamSource::new(reader)),
    })
}

pub struct FastqSource<R: BufRead> {
    reader: R,
    line: Vec<u8>,
    records: u64,
}

impl<R: BufRead> FastqSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            records: 0,
        }
    }

    /// Returns (raw length read, trimmed length) or None at EOF.
    fn read_line(&mut self) -> Result<Option<(usize, usize)>> {
        self.line.clear();
        let raw = self.reader.read_until(b'\n', &mut self.line)?;
        if raw == 0 {
            return Ok(None);
        }
        let mut end = self.line.len();
        while end > 0 && (self.line[end - 1] == b'\n' || self.line[end - 1] == b'\r') {
            end -= 1;
        }
        Ok(Some((raw, end)))
    }
}

impl<R: BufRead> RecordSource for FastqSource<R> {
    fn next_record(&mut self) -> Result<Option<(Record, usize)>> {
        let Some((raw0, end0)) = self.read_line()? else {
            return Ok(None);
        };
        if end0 == 0 || self.line[0] != b'@' {
            bail!("malformed FASTQ header at record {}", self.records + 1);
        }
        let mut bytes = raw0;
        let (raw1, end1) = self
            .read_line()?
            .ok_or_else(|| anyhow!("truncated FASTQ record {}", self.records + 1))?;
        let seq = self.line[..end1].to_vec();
        bytes += raw1;
        let (raw2, _) = self
            .read_line()?
            .ok_or_else(|| anyhow!("truncated FASTQ record {}", self.records + 1))?;
        bytes += raw2;
        let (raw3, end3) = self
            .read_line()?
            .ok_or_else(|| anyhow!("truncated FASTQ record {}", self.records + 1))?;
        let qual = self.line[..end3].to_vec();
        bytes += raw3;
        self.records += 1;
        Ok(Some((Record::unaligned(seq, qual), bytes)))
    }

    fn skip_record(&mut self) -> Result<bool> {
        for i in 0..4 {
            if self.read_line()?.is_none() {
                if i == 0 {
                    return Ok(false);
                }
                bail!("truncated FASTQ record {}", self.records + 1);
            }
        }
        self.records += 1;
        Ok(true)
    }
}

pub struct SamSource<R: BufRead> {
    reader: R,
    line: Vec<u8>,
    records: u64,
}

impl<R: BufRead> SamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            records: 0,
        }
    }

    /// Next alignment line, skipping `@` header lines. Returns the raw
    /// byte length read.
    fn next_line(&mut self) -> Result<Option<usize>> {
        loop {
            self.line.clear();
            let raw = self.reader.read_until(b'\n', &mut self.line)?;
            if raw == 0 {
                return Ok(None);
            }
            while self.line.last().is_some_and(|&b| b == b'\n' || b == b'\r') {
                self.line.pop();
            }
            if self.line.is_empty() || self.line[0] == b'@' {
                continue;
            }
            return Ok(Some(raw));
        }
    }

    fn parse_line(&self, raw: usize) -> Result<(Record, usize)> {
        let fields: Vec<&[u8]> = self.line.split(|&b| b == b'\t').collect();
        if fields.len() < 11 {
            bail!(
                "malformed SAM line at record {}: {} fields",
                self.records + 1,
                fields.len()
            );
        }
        let flag: u16 = std::str::from_utf8(fields[1])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("malformed SAM FLAG at record {}", self.records + 1))?;
        let seq = if fields[9] == b"*" {
            Vec::new()
        } else {
            fields[9].to_vec()
        };
        let qual = if fields[10] == b"*" {
            Vec::new()
        } else {
            fields[10].to_vec()
        };
        let md = fields[11..]
            .iter()
            .find_map(|f| f.strip_prefix(b"MD:Z:"))
            .map(|v| String::from_utf8_lossy(v).into_owned());
        let align = AlignInfo {
            mapped: flag & 0x4 == 0,
            reverse: flag & 0x10 != 0,
            cigar: String::from_utf8_lossy(fields[5]).into_owned(),
            md,
        };
        Ok((Record::aligned(seq, qual, align), raw))
    }
}

impl<R: BufRead> RecordSource for SamSource<R> {
    fn next_record(&mut self) -> Result<Option<(Record, usize)>> {
        let Some(raw) = self.next_line()? else {
            return Ok(None);
        };
        let parsed = self.parse_line(raw)?;
        self.records += 1;
        Ok(Some(parsed))
    }

    fn skip_record(&mut self) -> Result<bool> {
        let skipped = self.next_line()?.is_some();
        if skipped {
            self.records += 1;
        }
        Ok(skipped)
    }
}

/// Up to `limit` (read-length, serialized-size) pairs from the start of
/// the stream, for the sampling estimator.
pub fn sample_prefix(source: &mut dyn RecordSource, limit: usize) -> Result<Vec<(usize, usize)>> {
    let mut pairs = Vec::new();
    while pairs.len() < limit {
        match source.next_record()? {
            Some((record, bytes)) => pairs.push((record.seq.len(), bytes)),
            None => break,
        }
    }
    Ok(pairs)
}

/// Stream of every `stride`-th record, produced on a dedicated thread
/// and handed over a bounded channel. The engine consumes the iterator
/// single-threaded; skipped records are discarded inside the producer
/// without being built.
pub struct RecordStream {
    rx: Option<channel::Receiver<Result<Vec<Record>>>>,
    handle: Option<thread::JoinHandle<()>>,
    pending: std::vec::IntoIter<Record>,
}

pub fn stream_records(mut source: Box<dyn RecordSource + Send>, stride: usize) -> RecordStream {
    let stride = stride.max(1);
    let (tx, rx) = channel::bounded::<Result<Vec<Record>>>(4);
    let handle = thread::spawn(move || {
        let mut batch = Vec::with_capacity(STREAM_BATCH);
        loop {
            match source.next_record() {
                Ok(Some((record, _))) => {
                    batch.push(record);
                    if batch.len() == STREAM_BATCH
                        && tx.send(Ok(std::mem::take(&mut batch))).is_err()
                    {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
            for _ in 1..stride {
                match source.skip_record() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        }
        if !batch.is_empty() {
            let _ = tx.send(Ok(batch));
        }
    });
    RecordStream {
        rx: Some(rx),
        handle: Some(handle),
        pending: Vec::new().into_iter(),
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                return Some(Ok(record));
            }
            match self.rx.as_ref()?.recv() {
                Ok(Ok(batch)) => self.pending = batch.into_iter(),
                Ok(Err(e)) => return Some(Err(e)),
                Err(_) => return None,
            }
        }
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        drop(self.rx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
