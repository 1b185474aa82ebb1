//! Minimal hand-written SVG charts for the figure archive.

use std::fmt::Write;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 600.0;
const LEFT: f64 = 64.0;
const RIGHT: f64 = 24.0;
const TOP: f64 = 40.0;
const BOTTOM: f64 = 56.0;

const PALETTE: [&str; 8] = [
    "#4878a8", "#d8684c", "#609060", "#b08030", "#7868a8", "#488898", "#a85878", "#808078",
];

pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

pub fn line_chart(title: &str, x_label: &str, y_label: &str, series: &[Series]) -> String {
    let mut out = String::new();
    let (x_min, x_max, y_max) = ranges(series);
    frame(&mut out, title);
    axes(&mut out, x_label, y_label, x_min, x_max, y_max);

    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;
    let x_span = (x_max - x_min).max(1e-9);
    let y_span = y_max.max(1e-9);
    for (si, s) in series.iter().enumerate() {
        if s.points.is_empty() {
            continue;
        }
        let color = PALETTE[si % PALETTE.len()];
        let mut path = String::new();
        for &(x, y) in &s.points {
            let px = LEFT + (x - x_min) / x_span * plot_w;
            let py = TOP + plot_h - (y / y_span * plot_h);
            let _ = write!(path, "{px:.1},{py:.1} ");
        }
        let _ = writeln!(
            out,
            "<polyline points=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"1.5\"/>",
            path.trim_end(),
            color
        );
        let _ = writeln!(
            out,
            "<text x=\"{}\" y=\"{}\" font-size=\"11\" fill=\"{}\">{}</text>",
            WIDTH - RIGHT - 150.0,
            TOP + 14.0 * (si as f64 + 1.0),
            color,
            escape(&s.label)
        );
    }
    out.push_str("</svg>\n");
    out
}

pub fn bar_chart(title: &str, x_label: &str, y_label: &str, bars: &[(f64, f64)]) -> String {
    let mut out = String::new();
    let x_min = bars.first().map(|b| b.0).unwrap_or(0.0);
    let x_max = bars.last().map(|b| b.0).unwrap_or(1.0);
    let y_max = bars.iter().map(|&(_, y)| y).fold(0.0, f64::max);
    frame(&mut out, title);
    axes(&mut out, x_label, y_label, x_min, x_max, y_max);

    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;
    let bar_w = (plot_w / bars.len().max(1) as f64).max(1.0);
    let y_span = y_max.max(1e-9);
    for (i, &(_, y)) in bars.iter().enumerate() {
        let h = y / y_span * plot_h;
        let _ = writeln!(
            out,
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"{}\"/>",
            LEFT + i as f64 * bar_w,
            TOP + plot_h - h,
            (bar_w * 0.9).max(0.5),
            h,
            PALETTE[0]
        );
    }
    out.push_str("</svg>\n");
    out
}

fn ranges(series: &[Series]) -> (f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_max = 0.0f64;
    for s in series {
        for &(x, y) in &s.points {
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_max = y_max.max(y);
        }
    }
    if !x_min.is_finite() {
        (0.0, 1.0, 1.0)
    } else {
        (x_min, x_max.max(x_min + 1.0), y_max)
    }
}

fn frame(out: &mut String, title: &str) {
    let _ = writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\">"
    );
    let _ = writeln!(
        out,
        "<rect x=\"0\" y=\"0\" width=\"{WIDTH}\" height=\"{HEIGHT}\" fill=\"#fafafa\"/>"
    );
    let _ = writeln!(
        out,
        "<rect x=\"{LEFT}\" y=\"{TOP}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"#fff\" stroke=\"#ddd\"/>",
        WIDTH - LEFT - RIGHT,
        HEIGHT - TOP - BOTTOM
    );
    let _ = writeln!(
        out,
        "<text x=\"{:.1}\" y=\"22\" font-size=\"14\" text-anchor=\"middle\">{}</text>",
        WIDTH / 2.0,
        escape(title)
    );
}

fn axes(out: &mut String, x_label: &str, y_label: &str, x_min: f64, x_max: f64, y_max: f64) {
    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;
    for i in 0..=5 {
        let f = i as f64 / 5.0;
        let y = TOP + plot_h - f * plot_h;
        let _ = writeln!(
            out,
            "<line x1=\"{LEFT}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"#eee\"/>",
            LEFT + plot_w
        );
        let _ = writeln!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" text-anchor=\"end\">{}</text>",
            LEFT - 6.0,
            y + 3.0,
            tick(f * y_max)
        );
        let x = LEFT + f * plot_w;
        let _ = writeln!(
            out,
            "<text x=\"{x:.1}\" y=\"{:.1}\" font-size=\"10\" text-anchor=\"middle\">{}</text>",
            TOP + plot_h + 16.0,
            tick(x_min + f * (x_max - x_min))
        );
    }
    let _ = writeln!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\" text-anchor=\"middle\">{}</text>",
        LEFT + plot_w / 2.0,
        HEIGHT - 16.0,
        escape(x_label)
    );
    let _ = writeln!(
        out,
        "<text x=\"18\" y=\"{:.1}\" font-size=\"12\" text-anchor=\"middle\" transform=\"rotate(-90 18 {:.1})\">{}</text>",
        TOP + plot_h / 2.0,
        TOP + plot_h / 2.0,
        escape(y_label)
    );
}

fn tick(v: f64) -> String {
    if v >= 1000.0 {
        format!("{:.0}", v)
    } else if v == v.trunc() {
        format!("{:.0}", v)
    } else {
        format!("{:.1}", v)
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
