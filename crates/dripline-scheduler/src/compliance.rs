//! Opt-out gate applied before any outbound marketing message.

use dripline_core::types::{ChannelKind, Contact};

/// Whether sending to `contact` over `channel` is forbidden.
///
/// Only phone channels honour `whatsapp_opt_out`; email has no opt-out flag
/// in the CRM yet and is never blocked here.
pub fn is_blocked(contact: &Contact, channel: ChannelKind) -> bool {
    channel.is_phone_based() && contact.whatsapp_opt_out
}

/// Campaign audiences drop opted-out contacts regardless of channel.
pub fn excluded_from_audience(contact: &Contact) -> bool {
    contact.whatsapp_opt_out
}
