//! Share-token normalization.
//!
//! Share input arrives from three surfaces — a raw token pasted by the
//! user, an HTTPS share URL, and the `commands-desktop://` deep link — and
//! collapses to one canonical token matching `[A-Za-z0-9_-]{16,512}`.

use crate::error::ProtoError;

pub const MIN_TOKEN_LEN: usize = 16;
pub const MAX_TOKEN_LEN: usize = 512;

const PATH_MARKERS: [&str; 2] = ["commands-desktop://share/", "/share/"];
const QUERY_MARKERS: [&str; 2] = ["?token=", "&token="];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

pub fn is_valid_share_token(token: &str) -> bool {
    (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len()) && token.chars().all(is_token_char)
}

/// Extract and validate a share token from any accepted surface.
///
/// URL forms only count when the input actually looks like a URL; a bare
/// token containing no scheme or slash is taken verbatim.
pub fn normalize_share_input(input: &str) -> Result<String, ProtoError> {
    let input = input.trim();

    if is_valid_share_token(input) {
        return Ok(input.to_string());
    }

    let is_url = input.starts_with("https://")
        || input.starts_with("http://")
        || input.starts_with("commands-desktop://");
    if !is_url {
        return Err(ProtoError::InvalidShareToken);
    }

    for marker in QUERY_MARKERS.iter().chain(PATH_MARKERS.iter()) {
        if let Some(idx) = input.find(marker) {
            let rest = &input[idx + marker.len()..];
            let token: String = rest.chars().take_while(|c| is_token_char(*c)).collect();
            if is_valid_share_token(&token) {
                return Ok(token);
            }
        }
    }
    Err(ProtoError::InvalidShareToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "abcDEF0123456789_-x";

    #[test]
    fn raw_token_passes_through() {
        assert_eq!(normalize_share_input(TOKEN).unwrap(), TOKEN);
        assert_eq!(normalize_share_input(&format!("  {TOKEN}\n")).unwrap(), TOKEN);
    }

    #[test]
    fn https_query_param_is_extracted() {
        let url = format!("https://commands.com/app?foo=1&token={TOKEN}");
        assert_eq!(normalize_share_input(&url).unwrap(), TOKEN);
    }

    #[test]
    fn https_share_path_is_extracted() {
        let url = format!("https://commands.com/share/{TOKEN}");
        assert_eq!(normalize_share_input(&url).unwrap(), TOKEN);
        let with_query = format!("https://commands.com/share/{TOKEN}?utm=x");
        assert_eq!(normalize_share_input(&with_query).unwrap(), TOKEN);
    }

    #[test]
    fn deep_link_is_extracted() {
        let url = format!("commands-desktop://share/{TOKEN}");
        assert_eq!(normalize_share_input(&url).unwrap(), TOKEN);
    }

    #[test]
    fn too_short_token_is_rejected() {
        assert!(normalize_share_input("shorttoken").is_err());
        assert!(normalize_share_input("https://commands.com/share/short").is_err());
    }

    #[test]
    fn oversized_token_is_rejected() {
        let long = "a".repeat(MAX_TOKEN_LEN + 1);
        assert!(normalize_share_input(&long).is_err());
    }

    #[test]
    fn bad_characters_are_rejected() {
        assert!(normalize_share_input("abc DEF 0123456789!").is_err());
    }
}
