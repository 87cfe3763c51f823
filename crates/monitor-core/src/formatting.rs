/// Format a token count as `B`/`M`/`K` with a short mantissa.
///
/// # Examples
///
/// ```
/// use monitor_core::formatting::format_tokens;
///
/// assert_eq!(format_tokens(950), "950");
/// assert_eq!(format_tokens(12_300), "12K");
/// assert_eq!(format_tokens(4_210_000), "4.2M");
/// assert_eq!(format_tokens(1_700_000_000), "1.7B");
/// ```
pub fn format_tokens(n: u64) -> String {
    let v = n as f64;
    if n >= 1_000_000_000 {
        format!("{:.1}B", v / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.1}M", v / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.0}K", v / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Turn a model id into a short display name.
///
/// Date-like suffixes (eight or more digits) are dropped.
///
/// # Examples
///
/// ```
/// use monitor_core::formatting::format_model_name;
///
/// assert_eq!(format_model_name("claude-opus-4-6"), "Opus 4.6");
/// assert_eq!(format_model_name("claude-opus-4-5-20251101"), "Opus 4.5");
/// assert_eq!(format_model_name("claude-haiku"), "Haiku");
/// ```
pub fn format_model_name(model_id: &str) -> String {
    let name = model_id.replace("claude-", "");
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() >= 3 {
        let version: Vec<&str> = parts[1..]
            .iter()
            .copied()
            .filter(|p| !(p.len() >= 8 && p.chars().all(|c| c.is_ascii_digit())))
            .collect();
        format!("{} {}", title_case(parts[0]), version.join("."))
    } else {
        title_case(&name)
    }
}

/// Resident memory in MB as `"512MB"` or, from 1024 MB up, `"1.5GB"`.
pub fn format_memory(mem_mb: f64) -> String {
    if mem_mb >= 1024.0 {
        format!("{:.1}GB", mem_mb / 1024.0)
    } else {
        format!("{:.0}MB", mem_mb)
    }
}

/// Cut `s` to at most `width` characters, ending in `...` when shortened.
///
/// ```
/// use monitor_core::formatting::truncate_display;
///
/// assert_eq!(truncate_display("cargo test", 25), "cargo test");
/// assert_eq!(truncate_display("abcdefghij", 8), "abcde...");
/// ```
pub fn truncate_display(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let keep = width.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Capitalise the first letter of every alphabetic run.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tokens_boundaries() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(1_000), "1K");
        assert_eq!(format_tokens(1_000_000), "1.0M");
        assert_eq!(format_tokens(1_000_000_000), "1.0B");
    }

    #[test]
    fn test_format_model_name_keeps_short_ids() {
        assert_eq!(format_model_name("claude-sonnet-4"), "Sonnet-4");
        assert_eq!(format_model_name("gpt-4"), "Gpt-4");
    }

    #[test]
    fn test_format_model_name_multi_part_version() {
        assert_eq!(format_model_name("claude-sonnet-4-5-20250929"), "Sonnet 4.5");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(312.4), "312MB");
        assert_eq!(format_memory(1536.0), "1.5GB");
    }

    #[test]
    fn test_truncate_display_counts_chars_not_bytes() {
        assert_eq!(truncate_display("ééééé", 5), "ééééé");
        assert_eq!(truncate_display("éééééé", 5), "éé...");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("opus"), "Opus");
        assert_eq!(title_case("OPUS-max"), "Opus-Max");
    }
}
