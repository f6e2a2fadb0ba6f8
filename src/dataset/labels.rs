//! YOLO normalized box labels: `class cx cy w h`, coordinates in [0, 1].

use crate::error::DatasetError;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxLabel {
    pub class: u32,
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

impl BoxLabel {
    /// Parse one label line.
    ///
    /// Blank lines and lines without exactly five fields are not labels and
    /// give `Ok(None)`; five fields that are not numbers are an error.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Ok(None);
        }

        let class: f64 = fields[0]
            .parse()
            .map_err(|_| format!("class '{}' is not a number", fields[0]))?;
        if !(class.is_finite() && class >= 0.0) {
            return Err(format!("class '{}' is not a valid index", fields[0]));
        }

        let mut values = [0.0f64; 4];
        for (slot, text) in values.iter_mut().zip(&fields[1..]) {
            *slot = text
                .parse()
                .map_err(|_| format!("'{}' is not a number", text))?;
        }
        let [cx, cy, w, h] = values;

        Ok(Some(Self {
            class: class as u32,
            cx,
            cy,
            w,
            h,
        }))
    }

    pub fn to_line(&self) -> String {
        format!(
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class, self.cx, self.cy, self.w, self.h
        )
    }

    /// Corner coordinates `(x1, y1, x2, y2)` on a `width`×`height` image,
    /// truncated toward zero.
    pub fn to_pixels(&self, width: u32, height: u32) -> (i32, i32, i32, i32) {
        let (w, h) = (width as f64, height as f64);
        (
            ((self.cx - self.w / 2.0) * w) as i32,
            ((self.cy - self.h / 2.0) * h) as i32,
            ((self.cx + self.w / 2.0) * w) as i32,
            ((self.cy + self.h / 2.0) * h) as i32,
        )
    }

    /// The box after the whole image content is shrunk by `factor` toward
    /// the image center.
    pub fn scaled_about_center(&self, factor: f64) -> Self {
        Self {
            class: self.class,
            cx: 0.5 + (self.cx - 0.5) * factor,
            cy: 0.5 + (self.cy - 0.5) * factor,
            w: self.w * factor,
            h: self.h * factor,
        }
    }
}

/// Read every label in a file. Malformed numbers fail the whole file.
pub fn read_labels(path: &Path) -> Result<Vec<BoxLabel>, DatasetError> {
    let text = std::fs::read_to_string(path)?;
    let mut labels = Vec::new();
    for (i, line) in text.lines().enumerate() {
        match BoxLabel::parse(line) {
            Ok(Some(label)) => labels.push(label),
            Ok(None) => {}
            Err(reason) => {
                return Err(DatasetError::Label {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason,
                })
            }
        }
    }
    Ok(labels)
}

pub fn write_labels(path: &Path, labels: &[BoxLabel]) -> Result<(), DatasetError> {
    let mut text = String::new();
    for label in labels {
        let _ = writeln!(text, "{}", label.to_line());
    }
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let label = BoxLabel::parse("3 0.5 0.25 0.1 0.2").unwrap().unwrap();
        assert_eq!(label.class, 3);
        assert_eq!(label.cy, 0.25);

        // Float class ids are written by some exporters
        assert_eq!(BoxLabel::parse("2.0 0.1 0.1 0.1 0.1").unwrap().unwrap().class, 2);
    }

    #[test]
    fn test_parse_skips_non_labels() {
        assert_eq!(BoxLabel::parse("").unwrap(), None);
        assert_eq!(BoxLabel::parse("0 0.5 0.5 0.1").unwrap(), None);
        assert_eq!(BoxLabel::parse("0 0.5 0.5 0.1 0.1 0.9").unwrap(), None);
        assert!(BoxLabel::parse("a 0.5 0.5 0.1 0.1").is_err());
        assert!(BoxLabel::parse("0 0.5 x 0.1 0.1").is_err());
        assert!(BoxLabel::parse("-1 0.5 0.5 0.1 0.1").is_err());
    }

    #[test]
    fn test_to_pixels() {
        let label = BoxLabel::parse("0 0.5 0.5 0.5 0.25").unwrap().unwrap();
        assert_eq!(label.to_pixels(360, 360), (90, 135, 270, 225));
    }

    #[test]
    fn test_scale_about_center() {
        let label = BoxLabel {
            class: 1,
            cx: 0.9,
            cy: 0.1,
            w: 0.2,
            h: 0.4,
        };
        let scaled = label.scaled_about_center(0.25);
        assert!((scaled.cx - 0.6).abs() < 1e-12);
        assert!((scaled.cy - 0.4).abs() < 1e-12);
        assert!((scaled.w - 0.05).abs() < 1e-12);
        assert!((scaled.h - 0.1).abs() < 1e-12);
        assert_eq!(scaled.to_line(), "1 0.600000 0.400000 0.050000 0.100000");
    }

    #[test]
    fn test_read_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "0 0.5 0.5 0.1 0.1\n\n1 0.5 oops 0.1 0.1\n").unwrap();
        match read_labels(&path) {
            Err(DatasetError::Label { line, .. }) => assert_eq!(line, 3),
            other => panic!("Expected label error, got {other:?}"),
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.txt");
        let labels = vec![BoxLabel {
            class: 4,
            cx: 0.5,
            cy: 0.5,
            w: 0.125,
            h: 0.25,
        }];
        write_labels(&path, &labels).unwrap();
        assert_eq!(read_labels(&path).unwrap(), labels);
    }
}
