//! Integration tests: compile descriptions end to end, check the generated C, and, when a
//! C compiler is available, build and run it against sample packets.

use fppc::{compile, CompileError, Error, Options};
use std::path::Path;
use std::process::Command;

const TWO_FIELDS: &str = r#"
header h_t {
    a: bit<4>;
    b: bit<12>;
}

struct headers_t {
    h: h_t;
}

parser prs(packet_in packet, out headers_t headers) {
    state start {
        packet.extract(headers.h);
        transition accept;
    }
}
"#;

const FIRST_BYTE_SELECT: &str = r#"
header tag_t {
    value: bit<8>;
}

struct headers_t {
    tag: tag_t;
}

parser prs(packet_in packet, out headers_t headers) {
    state start {
        transition select(packet.lookahead<bit<8>>()) {
            0x00: s1;
            default: reject;
        }
    }

    state s1 {
        transition accept;
    }
}
"#;

const ROUTING: &str = r#"
header k_t { key: bit<8>; }
struct headers_t { k: k_t; }

parser prs(packet_in packet, out headers_t headers) {
    state start {
        packet.extract(headers.k);
        transition select(headers.k.key) {
            1: a;
            2: b;
            default: c;
        }
    }
    state a { transition accept; }
    state b { transition accept; }
    state c { transition accept; }
}
"#;

const NIBBLE_THEN_LOOKAHEAD: &str = r#"
header tag_t { value: bit<8>; }
struct headers_t { tag: tag_t; }

parser prs(packet_in packet, out headers_t headers) {
    x: bit<4>;

    state start {
        packet.extract(x);
        transition select(packet.lookahead<bit<8>>()) {
            0xBC: s1;
            default: reject;
        }
    }

    state s1 {
        packet.extract(headers.tag);
        transition accept;
    }
}
"#;

const TUNNEL: &str = include_str!("../demos/tunnel.fpp");

fn generate(src: &str) -> fppc::GeneratedUnits {
    compile(src, &Options::default()).expect("compile")
}

fn diagnostics(src: &str) -> Vec<CompileError> {
    match compile(src, &Options::default()) {
        Err(Error::Generate(d)) => d.errors().to_vec(),
        Err(other) => panic!("expected generation errors, got {}", other),
        Ok(_) => panic!("expected generation errors"),
    }
}

// ==================== Generated text ====================

#[test]
fn test_two_field_header_extraction() {
    let units = generate(TWO_FIELDS);
    assert!(units.header.contains(
        "struct h_t {\n    uint8_t a; /* bit<4> */\n    uint16_t b; /* bit<12> */\n\n    uint32_t header_offset;\n    uint8_t header_valid;\n};"
    ));
    let body = &units.body;
    assert!(body.contains(
        "fpp_hdr_h->a = (uint8_t)((load_byte(fpp_packetStart, BYTES(fpp_packetOffsetInBits)) >> 4) & FPP_MASK(uint8_t, 4));"
    ));
    assert!(body.contains(
        "fpp_hdr_h->b = (uint16_t)(ntohs(load_half(fpp_packetStart, BYTES(fpp_packetOffsetInBits))) & FPP_MASK(uint16_t, 12));"
    ));
    assert!(body.contains("/* packet.extract(headers.h) */"));
}

#[test]
fn test_select_routing() {
    let body = generate(ROUTING).body;
    assert!(body.contains(
        "switch (fpp_hdr_k->key) {\n            case 1: goto a;\n            case 2: goto b;\n            default: goto c;\n        }"
    ));
    assert!(!body.contains("default: goto reject;"));
}

#[test]
fn test_repeated_case_label_keeps_first_target() {
    let body = generate(&ROUTING.replace("2: b;", "1: b;")).body;
    assert_eq!(body.matches("case 1: ").count(), 1);
    assert!(body.contains("case 1: goto a;"));
    assert!(!body.contains("goto b;"));
}

#[test]
fn test_select_without_default_rejects() {
    let body = generate(&ROUTING.replace("default: c;", "")).body;
    assert!(body.contains("default: goto reject;"));
}

#[test]
fn test_every_state_ends_in_a_jump() {
    let body = generate(TUNNEL).body;
    for state in ["start", "parse_ipv4", "parse_ipv6", "parse_tcp", "parse_udp"] {
        let label = format!("    {}: {{\n", state);
        let start = body.find(&label).unwrap_or_else(|| panic!("missing state {}", state));
        let end = start + body[start..].find("\n    }\n").expect("state end");
        let block = &body[start..end];
        let last = block.lines().last().expect("last line").trim();
        assert!(last.starts_with("goto ") || last == "}", "{}: {}", state, last);
    }
    assert!(body.ends_with(
        "    reject: {\n        return fpp_errorCode;\n    }\n    fpp_end: {\n        return fpp_errorCode;\n    }\n}\n"
    ));
}

#[test]
fn test_bounds_checks_route_to_reject() {
    let body = generate(TUNNEL).body;
    let checks = body.matches("if (fpp_packetEnd < fpp_packetStart + BYTES(").count();
    assert_eq!(checks, 5);
    for (i, _) in body.match_indices("fpp_errorCode = PacketTooShort;") {
        assert!(body[i..].trim_start_matches("fpp_errorCode = PacketTooShort;").trim_start().starts_with("goto reject;"));
    }
}

#[test]
fn test_tunnel_declarations() {
    let header = generate(TUNNEL).header;
    assert!(header.contains(
        "enum fpp_headers {\n    fpp_ethernet_h,\n    fpp_ipv4_h,\n    fpp_ipv6_h,\n    fpp_tcp_h,\n    fpp_udp_h,\n};"
    ));
    assert!(header.contains("    uint8_t dst_addr[6]; /* mac_addr_t */\n"));
    assert!(header.contains("    uint8_t src_addr[16]; /* bit<128> */\n"));
    assert!(header.contains("    uint32_t src_addr; /* ipv4_addr_t */\n"));
    assert_eq!(header.matches("struct ipv4_h {").count(), 1);
    let eth = header.find("struct ethernet_h {").expect("ethernet");
    let all = header.find("struct headers_t {").expect("headers");
    assert!(eth < all);
}

#[test]
fn test_variable_advance_is_emitted() {
    let body = generate(TUNNEL).body;
    assert!(body.contains("fpp_packetOffsetInBits += ((fpp_hdr_ipv4->ihl - 5) * 0x20);"));
}

#[test]
fn test_function_name_option() {
    let units = compile(TWO_FIELDS, &Options::default().with_function_name("parse_h")).expect("compile");
    assert!(units.header.contains("int parse_h(const uint8_t *packet, uint32_t packet_len, packet_hdr_t **out);"));
}

#[test]
fn test_lookahead_reads_from_the_current_bit() {
    let body = generate(NIBBLE_THEN_LOOKAHEAD).body;
    assert!(body.contains(
        "switch ((uint8_t)((ntohs(load_half(fpp_packetStart, BYTES(fpp_packetOffsetInBits))) >> 4) \
         & FPP_MASK(uint16_t, 8))) {"
    ));
    assert!(body.contains(
        "fpp_hdr_tag->value = (uint8_t)((ntohs(load_half(fpp_packetStart, \
         BYTES(fpp_packetOffsetInBits))) >> 4) & FPP_MASK(uint16_t, 8));"
    ));
}

// ==================== Generation errors ====================

#[test]
fn test_varbit_member_is_unsupported() {
    let src = TWO_FIELDS.replace("b: bit<12>;", "b: varbit<32>;");
    let errors = diagnostics(&src);
    assert!(matches!(
        &errors[0],
        CompileError::UnsupportedType { field: Some(f), .. } if f == "h_t.b"
    ));
}

#[test]
fn test_oversized_member_is_unsupported() {
    let src = TWO_FIELDS.replace("b: bit<12>;", "b: bit<4294967295>;");
    let errors = diagnostics(&src);
    assert!(matches!(
        &errors[0],
        CompileError::UnsupportedType { field: Some(f), .. } if f == "h_t.b"
    ));
}

#[test]
fn test_empty_struct_local_compiles() {
    let src = TWO_FIELDS
        .replace("struct headers_t {", "struct nothing_t {}\n\nstruct headers_t {")
        .replace("    state start {", "    none: nothing_t;\n\n    state start {");
    let units = generate(&src);
    assert!(units.header.contains("struct nothing_t {\n    uint8_t fpp_unused;\n};"));
    assert!(units.body.contains("struct nothing_t none = { 0 };"));
}

#[test]
fn test_multi_key_select_is_unsupported() {
    let src = ROUTING.replace("select(headers.k.key)", "select(headers.k.key, headers.k.key)");
    assert!(matches!(diagnostics(&src)[0], CompileError::UnsupportedSelect { .. }));
}

#[test]
fn test_wide_lookahead_is_unsupported() {
    let src = FIRST_BYTE_SELECT.replace("lookahead<bit<8>>", "lookahead<bit<48>>");
    assert!(matches!(diagnostics(&src)[0], CompileError::UnsupportedLookahead { .. }));
}

#[test]
fn test_wrong_arity() {
    let src = TWO_FIELDS.replace("packet_in packet, out headers_t headers", "packet_in packet");
    assert!(matches!(diagnostics(&src)[0], CompileError::WrongArity { found: 1, .. }));
}

#[test]
fn test_missing_parser() {
    assert_eq!(diagnostics("header h_t { a: bit<8>; }"), vec![CompileError::MissingEntry]);
}

#[test]
fn test_independent_errors_are_all_reported() {
    let src = ROUTING
        .replace("state a { transition accept; }", "state a { transition nowhere; }")
        .replace("state b { transition accept; }", "state b { transition elsewhere; }");
    let errors = diagnostics(&src);
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| matches!(e, CompileError::UnknownState { .. })));
}

// ==================== Compiled and run (requires cc) ====================

fn have_cc() -> bool {
    Command::new("cc")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Build the generated parser with `driver` as `main.c` and return its stdout.
fn run_c(units: &fppc::GeneratedUnits, driver: &str) -> String {
    let dir = tempfile::tempdir().expect("tempdir");
    let write = |name: &str, text: &str| std::fs::write(dir.path().join(name), text).expect("write");
    write("parser.h", &units.header);
    write("parser.c", &units.body);
    write("main.c", driver);
    let exe = dir.path().join("run");
    let status = Command::new("cc")
        .current_dir(dir.path())
        .args(["-std=c99", "-Wall", "-o"])
        .arg(&exe)
        .args(["parser.c", "main.c"])
        .status()
        .expect("cc");
    assert!(status.success(), "generated C did not compile");
    let out = Command::new(Path::new(&exe)).output().expect("run");
    assert!(out.status.success());
    String::from_utf8(out.stdout).expect("utf8")
}

const TWO_FIELDS_DRIVER: &str = r#"
#include <stdio.h>
#include "parser.h"

static void dump(const uint8_t *p, uint32_t len)
{
    packet_hdr_t *out = NULL;
    int rc = fpp_parse_packet(p, len, &out);
    printf("%d", rc);
    while (out != NULL) {
        packet_hdr_t *next = out->next;
        struct h_t *h = out->hdr;
        printf(" %x %x %u %u", h->a, h->b, h->header_valid, h->header_offset);
        free(h);
        free(out);
        out = next;
    }
    printf("\n");
}

int main(void)
{
    static const uint8_t packet[] = { 0xAB, 0xCD };
    dump(packet, 2);
    dump(packet, 1);
    return 0;
}
"#;

#[test]
fn test_compiled_two_field_header() {
    if !have_cc() {
        eprintln!("skipping: no C compiler");
        return;
    }
    let out = run_c(&generate(TWO_FIELDS), TWO_FIELDS_DRIVER);
    assert_eq!(out, "0 a bcd 1 0\n1\n");
}

const SELECT_DRIVER: &str = r#"
#include <stdio.h>
#include "parser.h"

int main(void)
{
    static const uint8_t zero[] = { 0x00, 0x11 };
    static const uint8_t other[] = { 0x42 };
    packet_hdr_t *out = NULL;
    int rc = fpp_parse_packet(zero, sizeof(zero), &out);
    printf("%d %s\n", rc, out == NULL ? "empty" : "nodes");
    rc = fpp_parse_packet(other, sizeof(other), &out);
    printf("%d %s\n", rc, out == NULL ? "empty" : "nodes");
    rc = fpp_parse_packet(other, 0, &out);
    printf("%d %s\n", rc, out == NULL ? "empty" : "nodes");
    return 0;
}
"#;

#[test]
fn test_compiled_first_byte_select() {
    if !have_cc() {
        eprintln!("skipping: no C compiler");
        return;
    }
    let out = run_c(&generate(FIRST_BYTE_SELECT), SELECT_DRIVER);
    assert_eq!(out, "0 empty\n0 empty\n1 empty\n");
}

const NIBBLE_DRIVER: &str = r#"
#include <stdio.h>
#include "parser.h"

static void dump(const uint8_t *p, uint32_t len)
{
    packet_hdr_t *out = NULL;
    int rc = fpp_parse_packet(p, len, &out);
    printf("%d", rc);
    while (out != NULL) {
        packet_hdr_t *next = out->next;
        struct tag_t *t = out->hdr;
        printf(" %x", t->value);
        free(t);
        free(out);
        out = next;
    }
    printf("\n");
}

int main(void)
{
    static const uint8_t match[] = { 0xAB, 0xCD, 0xEF };
    static const uint8_t miss[] = { 0xAB, 0x00 };
    dump(match, sizeof(match));
    dump(miss, sizeof(miss));
    dump(match, 1);
    return 0;
}
"#;

#[test]
fn test_compiled_lookahead_after_partial_byte() {
    if !have_cc() {
        eprintln!("skipping: no C compiler");
        return;
    }
    let out = run_c(&generate(NIBBLE_THEN_LOOKAHEAD), NIBBLE_DRIVER);
    assert_eq!(out, "0 bc\n0\n1\n");
}
