//! Synthetic acknowledgments for simulate mode, so a batch can be smoke
//! tested without any listener on the other end.

use chrono::Local;
use tracing::debug;

use crate::hl7::{self, Segment, DEFAULT_ENCODING_CHARACTERS, DEFAULT_FIELD_SEPARATOR};

const DEFAULT_PROCESSING_ID: &str = "P";
const DEFAULT_VERSION_ID: &str = "2.3";
const ACK_MESSAGE_TYPE: &str = "ACK";

/// Builds an `AA` acknowledgment for `message`, addressed back to its sender.
///
/// MSA-2 echoes `message_id` when given, otherwise the inbound MSH-10.
/// Messages without a usable header still get an ACK built from defaults.
pub fn build_ack(message: &str, message_id: Option<&str>) -> String {
    let header = hl7::find_header(message).map(|(_, header)| header);
    let field = |index: usize| header.as_ref().and_then(|h| h.field(index)).unwrap_or("");
    let field_or = |index: usize, default: &'static str| {
        header
            .as_ref()
            .map_or(default, |h| h.field_or(index, default))
    };

    let separator = header
        .as_ref()
        .map_or(DEFAULT_FIELD_SEPARATOR, Segment::separator);
    let encoding = field_or(1, DEFAULT_ENCODING_CHARACTERS);
    let component = encoding.chars().next().unwrap_or('^');

    // sender and receiver swap for the reply
    let (sending_app, sending_facility) = (field(2), field(3));
    let (receiving_app, receiving_facility) = (field(4), field(5));

    let message_type = ack_message_type(field(8), component);
    let processing_id = field_or(10, DEFAULT_PROCESSING_ID);
    let version_id = field_or(11, DEFAULT_VERSION_ID);
    let control_id = message_id.unwrap_or_else(|| field(hl7::CONTROL_ID_FIELD));

    let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    let ack_id = hl7::generate_control_id();

    let sep = separator.to_string();
    let msh = [
        "MSH",
        encoding,
        receiving_app,
        receiving_facility,
        sending_app,
        sending_facility,
        timestamp.as_str(),
        "",
        message_type.as_str(),
        ack_id.as_str(),
        processing_id,
        version_id,
    ]
    .join(sep.as_str());
    let msa = ["MSA", "AA", control_id].join(sep.as_str());

    debug!(%ack_id, control_id, "built simulated ACK");
    format!("{msh}\r{msa}\r")
}

/// `ADT^A01` becomes `ACK^A01`; a missing type becomes plain `ACK`.
fn ack_message_type(inbound: &str, component: char) -> String {
    let mut parts = vec![ACK_MESSAGE_TYPE];
    parts.extend(inbound.split(component).skip(1));
    parts.join(component.to_string().as_str())
}
