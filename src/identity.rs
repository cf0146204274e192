// ABOUTME: Canonical user identity helpers shared by adapters and allow-list checks.
// ABOUTME: Builds/parses "platform:id" strings and matches senders against allow-list entries.

use crate::bus::SenderInfo;

/// Build the canonical `platform:id` form for a user.
///
/// Both parts are trimmed and the platform segment is lowercased. Returns an
/// empty string when either part is empty, so callers can fall back to the
/// raw platform id.
pub fn build_canonical(platform: &str, id: &str) -> String {
    let platform = platform.trim();
    let id = id.trim();
    if platform.is_empty() || id.is_empty() {
        return String::new();
    }
    format!("{}:{}", platform.to_lowercase(), id)
}

/// Split a canonical id back into `(platform, id)`.
///
/// Returns `None` unless the string contains a `:` with non-empty text on
/// both sides. The id half may itself contain further colons.
pub fn parse_canonical(s: &str) -> Option<(&str, &str)> {
    let (platform, id) = s.split_once(':')?;
    if platform.is_empty() || id.is_empty() {
        return None;
    }
    Some((platform, id))
}

/// Match a sender against a single allow-list entry.
///
/// Supported entry forms:
/// - numeric platform id: `123456`
/// - username: `@alice`
/// - compound: `123456|alice` (either half may match id or username)
/// - canonical: `telegram:123456` (platform compared case-insensitively)
pub fn match_allowed(sender: &SenderInfo, entry: &str) -> bool {
    let entry = entry.trim();
    if entry.is_empty() {
        return false;
    }

    if entry.chars().all(|c| c.is_ascii_digit()) {
        return entry == sender.platform_id;
    }

    if let Some(name) = entry.strip_prefix('@') {
        return !name.is_empty() && name == sender.username;
    }

    if entry.contains('|') {
        return entry
            .split('|')
            .any(|part| !part.is_empty() && (part == sender.platform_id || part == sender.username));
    }

    if let Some((platform, id)) = parse_canonical(entry) {
        let canonical = format!("{}:{}", platform.to_lowercase(), id);
        if !sender.canonical_id.is_empty() {
            return canonical == sender.canonical_id;
        }
        // No canonical id recorded; compare against platform + platform id.
        return platform.eq_ignore_ascii_case(&sender.platform) && id == sender.platform_id;
    }

    false
}
