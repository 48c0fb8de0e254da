//! Reserved names shared by the generated declarations and body.

pub const RESERVED_PREFIX: &str = "fpp_";

/// Running offset in bits from the start of the packet.
pub const OFFSET_VAR: &str = "fpp_packetOffsetInBits";
pub const ERROR_VAR: &str = "fpp_errorCode";
pub const PACKET_START_VAR: &str = "fpp_packetStart";
pub const PACKET_END_VAR: &str = "fpp_packetEnd";
/// List node being linked by the current extraction.
pub const NODE_VAR: &str = "fpp_node";
/// Tail of the output list.
pub const LAST_NODE_VAR: &str = "fpp_lastHdr";
pub const ERROR_ENUM: &str = "fpp_errorCodes";
pub const HEADER_ENUM: &str = "fpp_headers";
/// Label taken when header allocation fails.
pub const END_LABEL: &str = "fpp_end";
/// Parameters of the generated entry point.
pub const PACKET_PARAM: &str = "packet";
pub const LENGTH_PARAM: &str = "packet_len";
pub const OUT_PARAM: &str = "out";
/// Label every rejecting path jumps to.
pub const REJECT_LABEL: &str = "reject";
pub const DEFAULT_FUNCTION: &str = "fpp_parse_packet";
pub const NODE_TYPE: &str = "packet_hdr_t";
pub const NODE_STRUCT: &str = "packet_hdr_s";
pub const MASK_MACRO: &str = "FPP_MASK";
pub const BYTES_MACRO: &str = "BYTES";

/// Runtime status codes, in declaration order.
pub const ERROR_CODES: [&str; 8] = [
    "NoError",
    "PacketTooShort",
    "NoMatch",
    "StackOutOfBounds",
    "HeaderTooShort",
    "ParserTimeout",
    "ParserDefaultReject",
    "OutOfMemory",
];

pub fn reserved(name: &str) -> String {
    format!("{}{}", RESERVED_PREFIX, name)
}

/// Pointer variable holding the most recent extraction of a header instance.
pub fn instance_var(instance: &str) -> String {
    reserved(&format!("hdr_{}", instance))
}

/// Discriminator tagging list nodes whose payload is `struct <header>`.
pub fn discriminator(header: &str) -> String {
    reserved(header)
}
