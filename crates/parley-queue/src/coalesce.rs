//! Merges raw fragments into flush-ready units.

use parley_core::types::{Fragment, FragmentPayload, Unit};

/// Separator placed between adjacent text fragments.
pub const DEFAULT_SEPARATOR: &str = ", ";

/// Coalesce an ordered run of fragments.
///
/// Adjacent text fragments are trimmed and joined with `separator` into a
/// single text unit; blank ones are dropped. An image always stays its own
/// unit and ends the current text run, so it keeps its position relative to
/// the surrounding text. A sequence with nothing but blank text yields no
/// units.
pub fn coalesce(fragments: Vec<Fragment>, separator: &str) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut pending: Vec<String> = Vec::new();

    for fragment in fragments {
        match fragment.payload {
            FragmentPayload::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    pending.push(trimmed.to_string());
                }
            }
            FragmentPayload::Image { caption, media } => {
                flush_text(&mut units, &mut pending, separator);
                units.push(Unit::Image { caption, media });
            }
        }
    }
    flush_text(&mut units, &mut pending, separator);

    units
}

fn flush_text(units: &mut Vec<Unit>, pending: &mut Vec<String>, separator: &str) {
    if !pending.is_empty() {
        units.push(Unit::Text {
            text: pending.join(separator),
        });
        pending.clear();
    }
}
