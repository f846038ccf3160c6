//! Keygen command - generate an encryption key.

use anyhow::{Result, bail};
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::Args;
use serde::Serialize;

use crumb_session::{CipherAlgorithm, ENCRYPTION_KEY_ENV, token};

use super::Context;

/// Arguments for the keygen command.
#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Algorithm the key is for (AES, AES-128-GCM, AES-256-GCM, CHACHA20-POLY1305)
    #[arg(short, long, default_value = "AES-256-GCM")]
    pub algorithm: String,
}

#[derive(Serialize)]
struct GeneratedKey {
    algorithm: &'static str,
    key: String,
}

/// Run the keygen command.
pub fn run(args: KeygenArgs, ctx: &Context) -> Result<()> {
    let algorithm = algorithm_for_name(&args.algorithm)?;
    let key = STANDARD.encode(token::generate_key(algorithm)?);

    if ctx.json_output {
        let output = GeneratedKey {
            algorithm: algorithm.name(),
            key,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if ctx.verbose {
        eprintln!(
            "{} key; export it as {} or set encryption_key in the config file",
            algorithm, ENCRYPTION_KEY_ENV
        );
    }
    println!("{}", key);
    Ok(())
}

/// Resolve an algorithm name without a key. Plain `AES` means AES-256-GCM.
fn algorithm_for_name(name: &str) -> Result<CipherAlgorithm> {
    for key_len in [32, 16] {
        if let Ok(algorithm) = CipherAlgorithm::resolve(name, key_len) {
            return Ok(algorithm);
        }
    }
    bail!("unsupported encryption algorithm '{}'", name)
}
