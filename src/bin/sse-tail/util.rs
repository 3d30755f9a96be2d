pub(crate) fn truncate_for_log(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let boundary = (0..=max).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
        format!("{}... ({} bytes total)", &text[..boundary], text.len())
    }
}
