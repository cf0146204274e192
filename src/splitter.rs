// ABOUTME: Splits long outbound text into platform-sized chunks, measured in code points.
// ABOUTME: Prefers newline/space cuts and keeps fenced code blocks highlighted across chunks.

/// Closer injected when a chunk has to end inside a fenced code block.
const FENCE_CLOSER: &str = "\n```";

/// Split `content` into chunks of at most `max_len` Unicode code points.
///
/// `max_len == 0` disables splitting. Cuts prefer the last newline inside the
/// candidate window, then the last space or tab, then a hard cut. A tail
/// reserve (10 % of `max_len`, at least 50, at most half) leaves room to close
/// an open code fence at the cut; the fence header line is re-emitted at the
/// start of the next chunk so syntax highlighting carries across.
pub fn split_message(content: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return vec![content.to_string()];
    }
    let total: Vec<char> = content.chars().collect();
    if total.len() <= max_len {
        return vec![content.to_string()];
    }

    let window = max_len.saturating_sub(tail_reserve(max_len)).max(1);
    let closer_len = FENCE_CLOSER.chars().count();

    let mut chunks = Vec::new();
    let mut rest: &[char] = &total;
    // Fence header to re-open at the start of the next chunk, without newline.
    let mut pending_header: Option<String> = None;

    while !rest.is_empty() {
        let header_len = pending_header
            .as_ref()
            .map(|h| h.chars().count() + 1)
            .unwrap_or(0);
        let eff_max = max_len.saturating_sub(header_len).max(1);
        let eff_window = window.saturating_sub(header_len).max(1);

        if rest.len() <= eff_max {
            chunks.push(compose(pending_header.take(), rest, false));
            break;
        }

        let mut cut = find_cut(rest, eff_window);
        let mut inject = false;
        let mut next_header = None;

        let scan = scan_fences(&rest[..cut], pending_header.as_deref());
        if scan.open {
            if let Some(ext) = closing_fence_end(rest, cut, eff_max) {
                // The block closes just past the window; take it whole.
                cut = ext;
            } else if cut > scan.opener_line_end {
                // Close the block at the cut and re-open it in the next chunk.
                // The reserved tail pays for the closer.
                let inj_limit = eff_max.saturating_sub(closer_len).max(1);
                let recut = find_cut(rest, inj_limit);
                if recut > scan.opener_line_end {
                    cut = recut;
                }
                inject = true;
                next_header = Some(scan.header.clone());
            } else if scan.opener_line_start > 0 {
                // No room for any block content; split before the block opens.
                cut = scan.opener_line_start;
            }
        }

        chunks.push(compose(pending_header.take(), &rest[..cut], inject));
        if inject {
            pending_header = next_header;
        }

        rest = &rest[cut..];
        while rest.first().is_some_and(|c| c.is_whitespace()) {
            rest = &rest[1..];
        }
    }

    chunks
}

/// Code points reserved at the chunk tail: 10 % of `max_len`, at least 50,
/// clamped to at most half of `max_len`.
fn tail_reserve(max_len: usize) -> usize {
    (max_len / 10).max(50).min(max_len / 2)
}

/// Pick a cut position within `limit` code points: last newline, else last
/// space/tab, else the hard limit. Always returns at least 1.
fn find_cut(slice: &[char], limit: usize) -> usize {
    let limit = limit.min(slice.len());
    if slice.len() <= limit {
        return slice.len();
    }
    let region = &slice[..limit];
    if let Some(pos) = region.iter().rposition(|&c| c == '\n') {
        return (pos + 1).max(1);
    }
    if let Some(pos) = region.iter().rposition(|&c| c == ' ' || c == '\t') {
        return (pos + 1).max(1);
    }
    limit.max(1)
}

struct FenceScan {
    /// True when the slice ends inside a fenced code block.
    open: bool,
    /// Char index of the open block's fence line start (0 when inherited).
    opener_line_start: usize,
    /// Char index just past the open block's fence line (0 when inherited).
    opener_line_end: usize,
    /// The opening fence line including the language tag, e.g. "```go".
    header: String,
}

/// Walk the slice line by line, toggling fence state on lines that start with
/// three backticks. `inherited` is the header of a block left open by the
/// previous chunk.
fn scan_fences(slice: &[char], inherited: Option<&str>) -> FenceScan {
    let mut scan = FenceScan {
        open: inherited.is_some(),
        opener_line_start: 0,
        opener_line_end: 0,
        header: inherited.unwrap_or_default().to_string(),
    };

    let mut i = 0;
    while i < slice.len() {
        let line_start = i;
        while i < slice.len() && slice[i] != '\n' {
            i += 1;
        }
        let line_end = i;
        if i < slice.len() {
            i += 1;
        }
        if is_fence_line(&slice[line_start..line_end]) {
            if scan.open {
                scan.open = false;
            } else {
                scan.open = true;
                scan.opener_line_start = line_start;
                scan.opener_line_end = i;
                scan.header = slice[line_start..line_end].iter().collect();
            }
        }
    }
    scan
}

fn is_fence_line(line: &[char]) -> bool {
    let mut i = 0;
    while i < line.len() && (line[i] == ' ' || line[i] == '\t') {
        i += 1;
    }
    line.len() >= i + 3 && line[i] == '`' && line[i + 1] == '`' && line[i + 2] == '`'
}

/// Find the end of a closing fence line between `from` and `limit`, if the
/// open block closes early enough to extend the chunk over it.
fn closing_fence_end(slice: &[char], from: usize, limit: usize) -> Option<usize> {
    let mut i = from;
    // A fence only counts at the start of a line.
    if i > 0 && slice[i - 1] != '\n' {
        while i < slice.len() && slice[i] != '\n' {
            i += 1;
        }
        i += 1;
    }
    while i < limit.min(slice.len()) {
        let line_start = i;
        while i < slice.len() && slice[i] != '\n' {
            i += 1;
        }
        let line_end = i;
        if i < slice.len() {
            i += 1;
        }
        if is_fence_line(&slice[line_start..line_end]) {
            if line_end <= limit {
                return Some(line_end);
            }
            return None;
        }
    }
    None
}

/// Assemble a chunk: optional re-opened fence header, the content slice, and
/// an optional injected closer (trailing whitespace is dropped before it).
fn compose(header: Option<String>, content: &[char], inject: bool) -> String {
    let mut chunk = String::new();
    if let Some(h) = header {
        chunk.push_str(&h);
        chunk.push('\n');
    }
    chunk.extend(content.iter());
    if inject {
        while chunk.ends_with(['\n', ' ', '\t']) {
            chunk.pop();
        }
        chunk.push_str(FENCE_CLOSER);
    }
    chunk
}
