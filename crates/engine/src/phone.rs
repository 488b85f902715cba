//! Phone number normalization for the messaging backend.

/// Suffix marking an address as a direct-message chat on the backend.
pub const DIRECT_MESSAGE_SUFFIX: &str = "@c.us";

/// Reduce a human-entered phone number to the backend's chat address.
///
/// Keeps only the digits (dropping a leading `+` and any separators) and
/// appends [`DIRECT_MESSAGE_SUFFIX`]. Never fails: plausibility checks are the
/// caller's job, so an input without digits yields a bare suffix.
pub fn normalize(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{digits}{DIRECT_MESSAGE_SUFFIX}")
}
