//! Fitting comment bodies under the platform size limit

/// Appended to every truncated body.
pub const TRUNCATION_SUFFIX: &str =
    "\n\n---\n*Comment truncated due to size limits. See full results in job summary.*";

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut end = index;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Shorten `body` to at most `max_size` bytes.
///
/// Content is cut at the last line break that leaves room for
/// [`TRUNCATION_SUFFIX`], never mid-line. When the limit cannot even hold
/// the suffix, only as much of the suffix as fits is returned.
pub fn truncate_body(body: &str, max_size: usize) -> String {
    if body.len() <= max_size {
        return body.to_string();
    }
    if TRUNCATION_SUFFIX.len() >= max_size {
        let end = floor_char_boundary(TRUNCATION_SUFFIX, max_size);
        return TRUNCATION_SUFFIX[..end].to_string();
    }

    let budget = max_size - TRUNCATION_SUFFIX.len();
    let window = &body[..floor_char_boundary(body, budget)];
    let kept = if body.as_bytes().get(budget) == Some(&b'\n') {
        window
    } else {
        match window.rfind('\n') {
            Some(index) => &window[..index],
            None => "",
        }
    };

    let mut truncated = String::with_capacity(kept.len() + TRUNCATION_SUFFIX.len());
    truncated.push_str(kept);
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}
