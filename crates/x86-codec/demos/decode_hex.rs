// Decode a hex byte string from argv and print each instruction found.
//
// Usage: cargo run --example decode_hex -- "48 89 d8 90"

use x86_codec::decode_all;

pub fn main() {
    let hex: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if hex.is_empty() {
        eprintln!("usage: decode_hex <hex bytes>");
        std::process::exit(1);
    }

    let bytes: Vec<u8> = hex
        .split_whitespace()
        .map(|tok| u8::from_str_radix(tok.trim_start_matches("0x"), 16))
        .collect::<Result<_, _>>()
        .unwrap_or_else(|e| {
            eprintln!("malformed hex byte: {e}");
            std::process::exit(1);
        });

    let (insns, failure) = decode_all(&bytes);
    for insn in &insns {
        println!("{insn}");
    }
    if let Some((offset, err)) = failure {
        eprintln!("decode failed at byte offset {offset}: {err}");
        std::process::exit(1);
    }
}
