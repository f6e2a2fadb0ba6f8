//! Raster charts: line plots, stacked areas and histograms, with a title,
//! axis names, the axis range and a legend.

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::sync::OnceLock;

pub const CHART_WIDTH: u32 = 1280;
pub const CHART_HEIGHT: u32 = 960;
pub const HISTOGRAM_BINS: usize = 30;

const MARGIN: u32 = 80;
const TITLE_SCALE: f32 = 30.0;
const LABEL_SCALE: f32 = 20.0;
const LEGEND_SWATCH: u32 = 16;
const GRID_LINES: u32 = 5;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);

/// Series colors, cycled.
pub const PALETTE: [Rgb<u8>; 10] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
    Rgb([148, 103, 189]),
    Rgb([140, 86, 75]),
    Rgb([227, 119, 194]),
    Rgb([127, 127, 127]),
    Rgb([188, 189, 34]),
    Rgb([23, 190, 207]),
];

pub fn palette(i: usize) -> Rgb<u8> {
    PALETTE[i % PALETTE.len()]
}

static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

fn font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_DATA) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!("Chart font unusable, drawing without text: {}", e);
            None
        }
    })
    .as_ref()
}

/// Title and axis names of a chart.
#[derive(Debug, Clone, Copy)]
pub struct Labels<'a> {
    pub title: &'a str,
    pub x: &'a str,
    pub y: &'a str,
}

/// One plotted series and its legend entry.
#[derive(Debug, Clone, Copy)]
pub struct Series<'a> {
    pub values: &'a [f64],
    pub color: Rgb<u8>,
    pub name: &'a str,
}

impl<'a> Series<'a> {
    pub fn new(values: &'a [f64], color: Rgb<u8>, name: &'a str) -> Self {
        Self { values, color, name }
    }
}

fn draw_text(img: &mut RgbImage, x: i32, y: i32, scale: f32, text: &str) {
    if let Some(font) = font() {
        draw_text_mut(img, AXIS, x, y, PxScale::from(scale), font, text);
    }
}

fn measure(scale: f32, text: &str) -> (u32, u32) {
    font().map_or((0, 0), |font| text_size(PxScale::from(scale), font, text))
}

fn format_tick(v: f64) -> String {
    if v.abs() >= 100.0 || v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

/// Smallest and largest non-NaN finite value.
pub fn finite_range<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    values
        .into_iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Data-to-pixel mapping for the plot area of a chart.
struct Axes {
    x: (f64, f64),
    y: (f64, f64),
}

impl Axes {
    fn new(x: Option<(f64, f64)>, y: Option<(f64, f64)>) -> Self {
        Self {
            x: widen(x.unwrap_or((0.0, 1.0)), 0.0),
            y: widen(y.unwrap_or((0.0, 1.0)), 0.05),
        }
    }

    /// Y axis starting at zero, for counts and stacked totals.
    fn from_zero(x: Option<(f64, f64)>, y_max: f64) -> Self {
        Self {
            x: widen(x.unwrap_or((0.0, 1.0)), 0.0),
            y: (0.0, if y_max > 0.0 { y_max * 1.05 } else { 1.0 }),
        }
    }

    fn left() -> f32 {
        MARGIN as f32
    }

    fn right() -> f32 {
        (CHART_WIDTH - MARGIN) as f32
    }

    fn top() -> f32 {
        MARGIN as f32
    }

    fn bottom() -> f32 {
        (CHART_HEIGHT - MARGIN) as f32
    }

    fn px(&self, x: f64) -> f32 {
        let t = (x - self.x.0) / (self.x.1 - self.x.0);
        Self::left() + t as f32 * (Self::right() - Self::left())
    }

    fn py(&self, y: f64) -> f32 {
        let t = (y - self.y.0) / (self.y.1 - self.y.0);
        Self::bottom() - t as f32 * (Self::bottom() - Self::top())
    }

    fn canvas(&self) -> RgbImage {
        let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, BACKGROUND);
        let (w, h) = (Self::right() - Self::left(), Self::bottom() - Self::top());
        for i in 1..GRID_LINES {
            let fx = Self::left() + w * i as f32 / GRID_LINES as f32;
            let fy = Self::top() + h * i as f32 / GRID_LINES as f32;
            draw_line_segment_mut(&mut img, (fx, Self::top()), (fx, Self::bottom()), GRID);
            draw_line_segment_mut(&mut img, (Self::left(), fy), (Self::right(), fy), GRID);
        }
        img
    }

    /// Plot border, title, axis names and the range at each axis end.
    fn frame(&self, img: &mut RgbImage, labels: &Labels) {
        let rect = Rect::at(MARGIN as i32, MARGIN as i32)
            .of_size(CHART_WIDTH - 2 * MARGIN, CHART_HEIGHT - 2 * MARGIN);
        draw_hollow_rect_mut(img, rect, AXIS);

        let (w, h) = measure(TITLE_SCALE, labels.title);
        let title_y = (MARGIN.saturating_sub(h) / 2) as i32;
        draw_text(img, (CHART_WIDTH.saturating_sub(w) / 2) as i32, title_y, TITLE_SCALE, labels.title);

        let below = Self::bottom() as i32 + 6;
        let (w, _) = measure(LABEL_SCALE, labels.x);
        draw_text(img, (CHART_WIDTH.saturating_sub(w) / 2) as i32, below + 26, LABEL_SCALE, labels.x);
        draw_text(img, 6, title_y, LABEL_SCALE, labels.y);

        let x_lo = format_tick(self.x.0);
        let x_hi = format_tick(self.x.1);
        draw_text(img, Self::left() as i32, below, LABEL_SCALE, &x_lo);
        let (w, _) = measure(LABEL_SCALE, &x_hi);
        draw_text(img, Self::right() as i32 - w as i32, below, LABEL_SCALE, &x_hi);

        for (value, y) in [(self.y.0, Self::bottom()), (self.y.1, Self::top())] {
            let text = format_tick(value);
            let (w, h) = measure(LABEL_SCALE, &text);
            let x = (Self::left() as i32 - 6 - w as i32).max(0);
            draw_text(img, x, y as i32 - h as i32 / 2, LABEL_SCALE, &text);
        }
    }

    /// Color swatch and name per series in the top-right corner.
    fn legend(img: &mut RgbImage, entries: &[Series]) {
        let widest = entries
            .iter()
            .map(|s| measure(LABEL_SCALE, s.name).0)
            .max()
            .unwrap_or(0);
        let x = Self::right() as i32 - widest as i32 - LEGEND_SWATCH as i32 - 18;
        for (i, entry) in entries.iter().enumerate() {
            let y = Self::top() as i32 + 10 + i as i32 * (LEGEND_SWATCH as i32 + 8);
            let swatch = Rect::at(x, y).of_size(LEGEND_SWATCH, LEGEND_SWATCH);
            draw_filled_rect_mut(img, swatch, entry.color);
            draw_text(img, x + LEGEND_SWATCH as i32 + 6, y - 2, LABEL_SCALE, entry.name);
        }
    }
}

/// Pad a range by `pad` of its width; a flat range is opened up by one.
fn widen((lo, hi): (f64, f64), pad: f64) -> (f64, f64) {
    if hi > lo {
        let d = (hi - lo) * pad;
        (lo - d, hi + d)
    } else {
        (lo - 0.5, hi + 0.5)
    }
}

/// One colored line per series over the shared `x`. NaN points leave gaps.
pub fn line_chart(labels: &Labels, x: &[f64], series: &[Series]) -> RgbImage {
    let axes = Axes::new(
        finite_range(x),
        finite_range(series.iter().flat_map(|s| s.values.iter())),
    );
    let mut img = axes.canvas();

    for Series { values, color, .. } in series {
        let mut prev: Option<(f32, f32)> = None;
        for (&xv, &yv) in x.iter().zip(values.iter()) {
            if !(xv.is_finite() && yv.is_finite()) {
                prev = None;
                continue;
            }
            let point = (axes.px(xv), axes.py(yv));
            match prev {
                Some(p) => draw_line_segment_mut(&mut img, p, point, *color),
                None => draw_line_segment_mut(&mut img, point, point, *color),
            }
            prev = Some(point);
        }
    }

    axes.frame(&mut img, labels);
    Axes::legend(&mut img, series);
    img
}

/// Layers stacked on top of each other, filled from the layer below.
pub fn stacked_chart(labels: &Labels, x: &[f64], layers: &[Series]) -> RgbImage {
    let totals: Vec<f64> = (0..x.len())
        .map(|i| {
            layers
                .iter()
                .map(|layer| layer.values.get(i).copied().filter(|v| v.is_finite()).unwrap_or(0.0))
                .sum()
        })
        .collect();
    let y_max = finite_range(&totals).map_or(1.0, |(_, hi)| hi.max(0.0));
    let axes = Axes::from_zero(finite_range(x), y_max);
    let mut img = axes.canvas();

    if !x.is_empty() {
        let left = Axes::left() as u32;
        let right = Axes::right() as u32;
        for column in left..=right {
            // Sample nearest to this pixel column
            let t = (column - left) as f64 / (right - left).max(1) as f64;
            let xv = axes.x.0 + t * (axes.x.1 - axes.x.0);
            let Some(i) = nearest(x, xv) else {
                continue;
            };

            let mut base = 0.0;
            for Series { values, color, .. } in layers {
                let v = values.get(i).copied().filter(|v| v.is_finite()).unwrap_or(0.0);
                if v > 0.0 {
                    let fx = column as f32;
                    draw_line_segment_mut(&mut img, (fx, axes.py(base)), (fx, axes.py(base + v)), *color);
                }
                base += v;
            }
        }
    }

    axes.frame(&mut img, labels);
    Axes::legend(&mut img, layers);
    img
}

fn nearest(x: &[f64], target: f64) -> Option<usize> {
    x.iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map(|(i, _)| i)
}

/// Equal-width bins over the finite values: `(low edge, bin width, counts)`.
pub fn bin_counts(values: &[f64], bins: usize) -> Option<(f64, f64, Vec<usize>)> {
    let (lo, hi) = finite_range(values)?;
    let bins = bins.max(1);
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0usize; bins];
    for v in values.iter().copied().filter(|v| v.is_finite()) {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    Some((lo, width, counts))
}

pub fn histogram(labels: &Labels, values: &[f64], bins: usize, color: Rgb<u8>) -> RgbImage {
    let Some((lo, width, counts)) = bin_counts(values, bins) else {
        let axes = Axes::new(None, None);
        let mut img = axes.canvas();
        axes.frame(&mut img, labels);
        return img;
    };

    let top = counts.iter().copied().max().unwrap_or(0) as f64;
    let axes = Axes::from_zero(Some((lo, lo + width * counts.len() as f64)), top);
    let mut img = axes.canvas();

    for (i, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let x0 = axes.px(lo + width * i as f64);
        let x1 = axes.px(lo + width * (i + 1) as f64);
        let y0 = axes.py(count as f64);
        let y1 = axes.py(0.0);
        let w = (x1 - x0).round().max(1.0) as u32;
        let h = (y1 - y0).round().max(1.0) as u32;
        draw_filled_rect_mut(&mut img, Rect::at(x0.round() as i32, y0.round() as i32).of_size(w, h), color);
        draw_hollow_rect_mut(&mut img, Rect::at(x0.round() as i32, y0.round() as i32).of_size(w, h), AXIS);
    }

    axes.frame(&mut img, labels);
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: Labels<'static> = Labels {
        title: "Chart",
        x: "frame_idx",
        y: "value",
    };

    fn count_color(img: &RgbImage, color: Rgb<u8>) -> usize {
        img.pixels().filter(|p| **p == color).count()
    }

    #[test]
    fn test_finite_range() {
        assert_eq!(finite_range(&[3.0, f64::NAN, -1.0, f64::INFINITY]), Some((-1.0, 3.0)));
        assert_eq!(finite_range(&[f64::NAN]), None);
    }

    #[test]
    fn test_bin_counts() {
        let (lo, width, counts) = bin_counts(&[0.0, 1.0, 2.0, 3.0, 4.0], 4).unwrap();
        assert_eq!(lo, 0.0);
        assert_eq!(width, 1.0);
        assert_eq!(counts, vec![1, 1, 1, 2]);

        let (lo, _, counts) = bin_counts(&[7.0, 7.0], 30).unwrap();
        assert_eq!(lo, 6.5);
        assert_eq!(counts.iter().sum::<usize>(), 2);
        assert!(bin_counts(&[f64::NAN], 30).is_none());
    }

    #[test]
    fn test_line_chart_draws_series() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [1.0, 3.0, f64::NAN, 2.0];
        let img = line_chart(&LABELS, &x, &[Series::new(&y, palette(0), "y")]);
        assert_eq!(img.dimensions(), (CHART_WIDTH, CHART_HEIGHT));
        assert!(count_color(&img, palette(0)) > 100);
    }

    #[test]
    fn test_title_and_legend_are_drawn() {
        let x = [1.0, 2.0];
        let plain = line_chart(&Labels { title: "", x: "", y: "" }, &x, &[]);
        let labeled = line_chart(
            &Labels {
                title: "Realtime Inference Time per Frame",
                ..LABELS
            },
            &x,
            &[Series::new(&[], palette(3), "inference_ms")],
        );

        let inked = |img: &RgbImage, rows: std::ops::Range<u32>| {
            rows.flat_map(|y| (0..CHART_WIDTH).map(move |x| (x, y)))
                .filter(|&(x, y)| *img.get_pixel(x, y) != BACKGROUND)
                .count()
        };
        let title_band = 0..MARGIN - 10;
        assert_eq!(inked(&plain, title_band.clone()), 0);
        assert!(inked(&labeled, title_band) > 50);

        // Only the legend swatch carries the series color
        let side = LEGEND_SWATCH as usize;
        assert_eq!(count_color(&labeled, palette(3)), side * side);
    }

    #[test]
    fn test_format_tick() {
        assert_eq!(format_tick(3.0), "3");
        assert_eq!(format_tick(2.5), "2.50");
        assert_eq!(format_tick(-0.25), "-0.25");
        assert_eq!(format_tick(1234.4), "1234");
    }

    #[test]
    fn test_stacked_chart_layers() {
        let x = [0.0, 1.0, 2.0];
        let a = [1.0, 1.0, 1.0];
        let b = [2.0, 0.0, 2.0];
        let img = stacked_chart(
            &LABELS,
            &x,
            &[Series::new(&a, palette(0), "NEU"), Series::new(&b, palette(1), "MON")],
        );
        assert!(count_color(&img, palette(0)) > 1000);
        assert!(count_color(&img, palette(1)) > 1000);
        // The lower layer sits on the bottom edge
        let bottom = CHART_HEIGHT - MARGIN - 2;
        assert_eq!(*img.get_pixel(CHART_WIDTH / 2, bottom), palette(0));
    }

    #[test]
    fn test_histogram_and_empty_input() {
        let values: Vec<f64> = (0..100).map(|i| (i % 10) as f64).collect();
        let img = histogram(&LABELS, &values, HISTOGRAM_BINS, palette(2));
        assert!(count_color(&img, palette(2)) > 1000);

        let blank = histogram(&LABELS, &[], HISTOGRAM_BINS, palette(2));
        assert_eq!(count_color(&blank, palette(2)), 0);
    }
}
