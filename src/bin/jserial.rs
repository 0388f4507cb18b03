//! jserial CLI: Disassemblieren und Verifizieren von Java-Serialization-Streams.

use clap::{Args, Parser, Subcommand};
use jserial::decoder;
use std::io::{IsTerminal, Read, Write};
use std::process;

#[derive(Parser)]
#[command(name = "jserial", about = "Java Object Serialization stream tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Disassemble a stream into a construction script
    Disasm(DisasmArgs),
    /// Decode, re-encode and compare byte-for-byte
    Verify(VerifyArgs),
}

#[derive(Args)]
struct DisasmArgs {
    /// Input file (- for stdin); raw bytes or hex text
    #[arg(short, long)]
    input: String,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Args)]
struct VerifyArgs {
    /// Input file (- for stdin); raw bytes or hex text
    #[arg(short, long)]
    input: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Fehler: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Disasm(args) => run_disasm(args),
        Command::Verify(args) => run_verify(args),
    }
}

fn run_disasm(args: DisasmArgs) -> Result<(), String> {
    let bytes = load_stream_bytes(&args.input)?;
    let stream = decoder::decode(&bytes).map_err(|e| format!("Decode-Fehler: {e}"))?;
    let script = decoder::render(&stream);

    match args.output.as_deref() {
        None | Some("-") => {
            std::io::stdout()
                .write_all(script.as_bytes())
                .map_err(|e| format!("Schreibfehler (stdout): {e}"))
        }
        Some(path) => write_atomic(path, script.as_bytes()),
    }
}

fn run_verify(args: VerifyArgs) -> Result<(), String> {
    let bytes = load_stream_bytes(&args.input)?;
    let stream = decoder::decode(&bytes).map_err(|e| format!("Decode-Fehler: {e}"))?;
    let rebuilt = decoder::reencode(&stream).map_err(|e| format!("Reencode-Fehler: {e}"))?;

    if rebuilt == bytes {
        println!("OK: {} bytes, {} contents", bytes.len(), stream.contents.len());
        return Ok(());
    }
    let offset = bytes
        .iter()
        .zip(rebuilt.iter())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| bytes.len().min(rebuilt.len()));
    Err(format!(
        "Reencode weicht ab: erster Unterschied bei Offset {offset} \
         (Original {} bytes, Reencode {} bytes)",
        bytes.len(),
        rebuilt.len()
    ))
}

fn read_input(path: &str) -> Result<Vec<u8>, String> {
    if path == "-" {
        if std::io::stdin().is_terminal() {
            eprintln!("Lese von stdin (Ctrl+D zum Beenden)...");
        }
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|e| format!("Lesefehler (stdin): {e}"))?;
        Ok(buf)
    } else {
        std::fs::read(path).map_err(|e| format!("Lesefehler '{}': {e}", path))
    }
}

/// Liest Stream-Bytes; Hex-Text (z. B. aus einem Paket-Dump) wird erkannt
/// und dekodiert, alles andere gilt als Rohbytes.
fn load_stream_bytes(path: &str) -> Result<Vec<u8>, String> {
    let raw = read_input(path)?;
    match parse_hex(&raw) {
        Some(bytes) => Ok(bytes),
        None => Ok(raw),
    }
}

/// Hex-Erkennung: nur Hex-Ziffern und Whitespace, gerade Anzahl Ziffern.
/// Ein echter Stream beginnt mit 0xAC und faellt hier sofort durch.
fn parse_hex(raw: &[u8]) -> Option<Vec<u8>> {
    let mut digits = Vec::new();
    for &b in raw {
        if b.is_ascii_hexdigit() {
            digits.push(b);
        } else if !b.is_ascii_whitespace() {
            return None;
        }
    }
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        bytes.push((hi * 16 + lo) as u8);
    }
    Some(bytes)
}

/// Schreibt atomar: erst .tmp, bei Erfolg umbenennen.
fn write_atomic(path: &str, data: &[u8]) -> Result<(), String> {
    let tmp_path = format!("{path}.tmp");
    if let Err(e) = std::fs::write(&tmp_path, data) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(format!("Schreibfehler '{tmp_path}': {e}"));
    }
    std::fs::rename(&tmp_path, path).map_err(|e| format!("Rename-Fehler: {e}"))
}
