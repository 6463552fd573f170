//! Approximate text measurement
//!
//! The DOCX table wraps long utterances before they reach the document,
//! so fragment widths must be estimated without a font rasterizer.
//! Per-character advance factors approximate a metric-compatible
//! minor-Latin face; widths are fractions of an em scaled by point size.
//! Estimates err slightly wide so wrapped rows never overflow the column.

/// Estimated width of `text` in points at the given font size.
pub fn text_width_pt(text: &str, font_size_pt: f64) -> f64 {
    text.chars().map(char_width_em).sum::<f64>() * font_size_pt
}

fn char_width_em(c: char) -> f64 {
    match c {
        'i' | 'j' | 'l' | '\'' | '|' | '!' => 0.30,
        'f' | 't' | 'r' | '(' | ')' | '[' | ']' | ',' | '.' | ';' | ':' => 0.37,
        'm' | 'w' => 0.82,
        'M' | 'W' => 0.94,
        'æ' | 'ø' => 0.60,
        c if c.is_ascii_uppercase() => 0.70,
        c if c.is_ascii_digit() => 0.56,
        ' ' => 0.32,
        '?' | '-' => 0.45,
        _ => 0.54,
    }
}

/// Greedy word wrap against `max_width_pt`. A single word wider than the
/// limit gets its own fragment rather than being split mid-word.
/// `first_line_reserved_pt` accounts for a speaker prefix rendered on the
/// first fragment only.
pub fn wrap_text(
    text: &str,
    font_size_pt: f64,
    max_width_pt: f64,
    first_line_reserved_pt: f64,
) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return vec![String::new()];
    }

    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut budget = max_width_pt - first_line_reserved_pt;

    for word in words {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };

        if text_width_pt(&candidate, font_size_pt) <= budget || current.is_empty() {
            current = candidate;
        } else {
            fragments.push(current);
            current = word.to_string();
            budget = max_width_pt;
        }
    }
    fragments.push(current);
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wider_strings_measure_wider() {
        let narrow = text_width_pt("illit", 12.0);
        let wide = text_width_pt("WWMMW", 12.0);
        assert!(wide > narrow * 2.0);
    }

    #[test]
    fn short_text_stays_on_one_line() {
        let fragments = wrap_text("Hej med dig", 12.0, 400.0, 0.0);
        assert_eq!(fragments, vec!["Hej med dig"]);
    }

    #[test]
    fn long_text_wraps_to_multiple_fragments() {
        let long = "ord ".repeat(100);
        let fragments = wrap_text(long.trim(), 12.0, 200.0, 0.0);
        assert!(fragments.len() > 1);
        // Re-joining loses nothing
        assert_eq!(fragments.join(" "), long.trim());
        for fragment in &fragments {
            assert!(text_width_pt(fragment, 12.0) <= 200.0);
        }
    }

    #[test]
    fn first_line_reservation_shortens_first_fragment() {
        let long = "ord ".repeat(50);
        let plain = wrap_text(long.trim(), 12.0, 200.0, 0.0);
        let reserved = wrap_text(long.trim(), 12.0, 200.0, 100.0);
        assert!(
            reserved[0].len() < plain[0].len(),
            "reserved first line should hold fewer words"
        );
    }

    #[test]
    fn oversized_single_word_gets_own_fragment() {
        let fragments = wrap_text("ekstraordinærtlangtord kort", 12.0, 30.0, 0.0);
        assert_eq!(fragments[0], "ekstraordinærtlangtord");
        assert_eq!(fragments[1], "kort");
    }
}
