use crate::output::print_json;
use anyhow::Context;
use autopilot_core::manifest::{
    canonicalize, deterministic_deliverable_hash, manifest_hash, DeliverableManifest, KeyOrder,
    ManifestSigner, SignedDeliverableManifest,
};
use clap::{Args, Subcommand};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct KeyArgs {
    /// HMAC signing key
    #[arg(long, env = "AUTOPILOT_SIGNING_KEY", hide_env_values = true)]
    signing_key: String,
}

#[derive(Subcommand)]
pub enum ManifestSubcommand {
    /// Print the canonical JSON form of a manifest
    Canonicalize {
        /// Manifest JSON file (`-` for stdin)
        file: PathBuf,
    },

    /// Print the SHA-256 hash of the canonical form
    Hash {
        /// Manifest JSON file (`-` for stdin)
        file: PathBuf,
    },

    /// Sign a manifest and print the signed envelope
    Sign {
        /// Manifest JSON file (`-` for stdin)
        file: PathBuf,
        /// Signer id (default: config `signer_id`, then "autopilot")
        #[arg(long)]
        signer_id: Option<String>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Check a signed envelope; exits non-zero when invalid
    Verify {
        /// Signed manifest JSON file (`-` for stdin)
        file: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Print the deterministic deliverable hash sent with a submission
    Commit {
        /// Manifest JSON file (`-` for stdin)
        file: PathBuf,
        /// Signer id (default: config `signer_id`, then "autopilot")
        #[arg(long)]
        signer_id: Option<String>,
        #[command(flatten)]
        key: KeyArgs,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, subcmd: ManifestSubcommand, json: bool) -> anyhow::Result<()> {
    let config = super::load_config_optional(config_path)?;
    let order = config.as_ref().map(|c| c.key_order).unwrap_or_default();
    let default_signer = config.and_then(|c| c.signer_id);

    match subcmd {
        ManifestSubcommand::Canonicalize { file } => {
            let manifest: DeliverableManifest = read_json(&file)?;
            println!("{}", canonicalize(&manifest, order));
            Ok(())
        }
        ManifestSubcommand::Hash { file } => {
            let manifest: DeliverableManifest = read_json(&file)?;
            let hash = manifest_hash(&manifest, order);
            if json {
                print_json(&serde_json::json!({ "manifestHash": hash }))
            } else {
                println!("{hash}");
                Ok(())
            }
        }
        ManifestSubcommand::Sign {
            file,
            signer_id,
            key,
        } => {
            let manifest: DeliverableManifest = read_json(&file)?;
            let signer = ManifestSigner::new(key.signing_key, signer_id.or(default_signer), order)?;
            let signed = signer.sign(&manifest).context("failed to sign manifest")?;
            print_json(&signed)
        }
        ManifestSubcommand::Verify { file, key } => verify(&file, &key.signing_key, order, json),
        ManifestSubcommand::Commit {
            file,
            signer_id,
            key,
        } => {
            let manifest: DeliverableManifest = read_json(&file)?;
            let signer_id = signer_id.or(default_signer);
            let hash = deterministic_deliverable_hash(
                &manifest,
                key.signing_key.as_bytes(),
                signer_id.as_deref(),
                order,
            )?;
            if json {
                print_json(&serde_json::json!({ "deliverableHash": hash }))
            } else {
                println!("{hash}");
                Ok(())
            }
        }
    }
}

fn verify(file: &Path, signing_key: &str, order: KeyOrder, json: bool) -> anyhow::Result<()> {
    let signed: SignedDeliverableManifest = read_json(file)?;
    let signer = ManifestSigner::new(signing_key, None, order)?;
    let valid = signer.verify(&signed);

    if json {
        print_json(&serde_json::json!({
            "valid": valid,
            "manifestHash": signed.manifest_hash,
            "signerId": signed.signature.signer_id,
        }))?;
    } else {
        println!("{}", if valid { "valid" } else { "invalid" });
    }

    if !valid {
        anyhow::bail!("signature does not match manifest");
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(file: &Path) -> anyhow::Result<T> {
    let text = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", file.display()))
}
