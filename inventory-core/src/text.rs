//! Full-text projection of a device.
//!
//! The projection is a pure function of the device state and is recomputed
//! on every write instead of being patched.

use crate::Device;

/// Collapses each run of non-alphanumeric characters into one space and
/// trims both ends.
pub fn text_to_keywords(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut gap = false;

    for c in input.chars() {
        if c.is_alphanumeric() {
            if gap && !out.is_empty() {
                out.push(' ');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }

    out
}

/// Device id, group and every string attribute of the indexable scopes,
/// each normalized and joined with single spaces.
pub fn device_text(device: &Device) -> String {
    let group = device.group.as_ref().map(|g| g.as_str());

    std::iter::once(device.id.as_str())
        .chain(group)
        .chain(
            device
                .attributes
                .iter()
                .filter(|attr| attr.scope.is_full_text())
                .filter_map(|attr| attr.value.as_str()),
        )
        .map(text_to_keywords)
        .filter(|keywords| !keywords.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
