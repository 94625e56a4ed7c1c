//! Font size fitting and word wrapping, independent of any raster backend.

/// Shrink factor applied on every fitting round.
const SHRINK_FACTOR: f32 = 0.9;
/// Upper bound of shrink rounds.
const MAX_ROUNDS: usize = 20;
pub const LINE_HEIGHT: f32 = 1.2;

/// Measures the advance width of a run of text at a font size.
pub trait TextMeasure {
    fn text_width(&self, text: &str, size: f32) -> f32;
}

impl TextMeasure for rusttype::Font<'_> {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        let scale = rusttype::Scale::uniform(size);
        self.layout(text, scale, rusttype::point(0.0, 0.0))
            .last()
            .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedText {
    pub font_size: f32,
    pub lines: Vec<String>,
    /// False when the floor size was reached and the text still overflows.
    pub fits: bool,
}

/// Height taken by `line_count` lines: the first line is one font size
/// tall, every following line adds the line height.
pub fn required_height(line_count: usize, size: f32) -> f32 {
    if line_count == 0 {
        return 0.0;
    }
    size + (line_count - 1) as f32 * LINE_HEIGHT * size
}

/// Greedy word wrap. A single word wider than `max_width` keeps its own line.
pub fn wrap_line(text: &str, max_width: f32, size: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = vec![];
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", current, word);
        if measure.text_width(&candidate, size) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_owned()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Find the largest font size (within `min_size..=max_size`) at which every
/// line, once wrapped, fits in `width` x `height`.
///
/// Always terminates: after a bounded number of rounds, or once the floor
/// size is reached, the last layout is returned with `fits == false`.
pub fn fit_text(
    lines: &[String],
    width: f32,
    height: f32,
    min_size: f32,
    max_size: f32,
    measure: &dyn TextMeasure,
) -> FittedText {
    let max_size = max_size.max(min_size);
    if lines.is_empty() {
        return FittedText {
            font_size: max_size,
            lines: vec![],
            fits: true,
        };
    }

    let mut size = (height / lines.len() as f32).clamp(min_size, max_size);
    let mut wrapped = vec![];
    for _ in 0..MAX_ROUNDS {
        wrapped = lines
            .iter()
            .flat_map(|line| wrap_line(line, width, size, measure))
            .collect::<Vec<_>>();
        let fits_height = required_height(wrapped.len(), size) <= height;
        let fits_width = wrapped
            .iter()
            .all(|line| measure.text_width(line, size) <= width);
        if fits_height && fits_width {
            return FittedText {
                font_size: size,
                lines: wrapped,
                fits: true,
            };
        }
        if size <= min_size {
            break;
        }
        size = (size * SHRINK_FACTOR).max(min_size);
    }

    log::debug!("Text does not fit the stamp, using {:.1}px.", size);
    FittedText {
        font_size: size,
        lines: wrapped,
        fits: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every character is half the font size wide.
    struct HalfEm;

    impl TextMeasure for HalfEm {
        fn text_width(&self, text: &str, size: f32) -> f32 {
            text.chars().count() as f32 * size * 0.5
        }
    }

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_line("aaaa bbbb cccc", 10.0 * 5.0 * 0.5, 10.0, &HalfEm);
        assert_eq!(lines, vec!["aaaa", "bbbb", "cccc"]);
        let lines = wrap_line("aa bb", 100.0, 10.0, &HalfEm);
        assert_eq!(lines, vec!["aa bb"]);
        assert!(wrap_line("   ", 100.0, 10.0, &HalfEm).is_empty());
    }

    #[test]
    fn required_height_counts_line_spacing() {
        assert_eq!(required_height(0, 10.0), 0.0);
        assert_eq!(required_height(1, 10.0), 10.0);
        assert!((required_height(3, 10.0) - 34.0).abs() < 1e-4);
    }

    #[test]
    fn roomy_box_keeps_initial_estimate() {
        let fitted = fit_text(&owned(&["ab", "cd"]), 800.0, 320.0, 4.0, 288.0, &HalfEm);
        assert!(fitted.fits);
        // starts from height / lines
        assert!(fitted.font_size <= 160.0 && fitted.font_size > 100.0);
        assert!(required_height(fitted.lines.len(), fitted.font_size) <= 320.0);
    }

    #[test]
    fn font_size_is_capped() {
        let fitted = fit_text(&owned(&["x"]), 1000.0, 1000.0, 1.0, 40.0, &HalfEm);
        assert!(fitted.fits);
        assert_eq!(fitted.font_size, 40.0);
    }

    #[test]
    fn shrinks_until_text_fits() {
        let text = owned(&["Signed by: Someone With A Long Name", "Date: 2024-01-01 10:00:00"]);
        let fitted = fit_text(&text, 200.0, 80.0, 1.0, 72.0, &HalfEm);
        assert!(fitted.fits);
        assert!(fitted.font_size < 40.0);
        assert!(required_height(fitted.lines.len(), fitted.font_size) <= 80.0);
        for line in &fitted.lines {
            assert!(HalfEm.text_width(line, fitted.font_size) <= 200.0);
        }
    }

    #[test]
    fn undersized_box_degrades_to_floor() {
        let text = owned(&["a very long line of text that will never fit"; 5]);
        let fitted = fit_text(&text, 3.0, 2.0, 1.0, 72.0, &HalfEm);
        assert!(!fitted.fits);
        assert!(fitted.font_size >= 1.0);
        assert!(!fitted.lines.is_empty());
    }

    #[test]
    fn empty_text_is_trivially_fitted() {
        let fitted = fit_text(&[], 10.0, 10.0, 1.0, 5.0, &HalfEm);
        assert!(fitted.fits);
        assert!(fitted.lines.is_empty());
    }
}
