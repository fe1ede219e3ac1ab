mod api;

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tapp_nfc::loopback::Field;
use tapp_nfc::nfc::{self, Availability, HostEmulation};
use tapp_nfc::pcsc::Context;
use tapp_nfc::{Config, Emulator, IdentityPayload, TapController, TapOutcome};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::api::CliApi;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Tap(#[from] tapp_nfc::Error),

    #[error("Error occurred while preparing the PC/SC reader: {0}")]
    Pcsc(#[from] tapp_nfc::pcsc::Error),

    #[error("Cannot build the identity: {0}")]
    Payload(#[from] tapp_nfc::payload::Error),

    #[error("Cannot emulate the identity: {0}")]
    Emulator(#[from] tapp_nfc::emulator::Error),

    #[error("Invalid hex input: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Parser)]
#[command(name = "tapp-nfc", version, about)]
struct Cli {
    /// TOML file to load the settings from.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root of the friend API. Taps are only logged when unset.
    #[arg(long, global = true)]
    api: Option<Url>,

    /// Milliseconds to wait for a tag.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Also records each tap against this event.
    #[arg(long, global = true)]
    event: Option<String>,

    /// Logs APDUs and session transitions.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reads a friend's identity off a PC/SC reader and adds them.
    Read {
        /// Your user ID.
        #[arg(long)]
        me: String,
    },

    /// Taps two in-process devices together.
    Loopback {
        /// User ID of the reading side.
        #[arg(long)]
        me: String,

        #[command(flatten)]
        identity: Identity,
    },

    /// Prints the NDEF message carrying an identity, in hex.
    Encode {
        #[command(flatten)]
        identity: Identity,
    },

    /// Decodes an NDEF message given in hex.
    Decode { message: String },

    /// Answers command APDUs read from stdin, one hex line each.
    Respond {
        #[command(flatten)]
        identity: Identity,
    },
}

/// The identity to broadcast.
#[derive(Args)]
struct Identity {
    #[arg(long)]
    uuid: String,

    #[arg(long)]
    name: String,

    #[arg(long)]
    slug: Option<String>,
}

impl From<Identity> for IdentityPayload {
    fn from(identity: Identity) -> Self {
        let payload = IdentityPayload::new(identity.uuid, identity.name);
        match identity.slug {
            Some(slug) => payload.with_slug(slug),
            None => payload,
        }
    }
}

/// PC/SC readers cannot present a tag.
struct NoEmulation;

impl HostEmulation for NoEmulation {
    fn availability(&self) -> Availability {
        Availability::Unsupported
    }

    fn enable(&self, _: Arc<Emulator>) -> nfc::Result<()> {
        Err(nfc::Error::Platform("PC/SC readers cannot emulate".to_string()))
    }

    fn disable(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match cli.verbose {
            true => "debug",
            _ => "info",
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    debug!("{:?}", config);

    match cli.command {
        Command::Read { me } => {
            let radio = Context::try_new()?.open()?;
            let api = CliApi::new(config.api_base_url.clone());
            let controller = Arc::new(TapController::new(me, config, radio, NoEmulation, api)?);

            info!("Hold a phone to the reader...");
            let outcome = read_until_interrupted(&controller).await?;
            print_outcome(&outcome)?;
        }
        Command::Loopback { me, identity } => {
            let field = Field::new();
            let payload = IdentityPayload::from(identity);
            let api = CliApi::new(config.api_base_url.clone());

            let theirs = TapController::new(
                payload.uuid.clone(),
                config.clone(),
                field.radio(),
                field.emulation(),
                CliApi::DryRun,
            )?;
            let mine = Arc::new(TapController::new(
                me,
                config,
                field.radio(),
                field.emulation(),
                api,
            )?);

            theirs.start_emulation(&payload)?;
            let outcome = read_until_interrupted(&mine).await;
            theirs.stop_emulation();

            print_outcome(&outcome?)?;
        }
        Command::Encode { identity } => {
            let message = IdentityPayload::from(identity).to_ndef(&config.language)?;
            println!("{}", hex::encode_upper(message));
        }
        Command::Decode { message } => {
            let message = hex::decode(message.trim())?;
            let payload = IdentityPayload::from_ndef(&message)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Respond { identity } => {
            let emulator = Emulator::new(&IdentityPayload::from(identity), &config.language)?;
            respond(&emulator, io::stdin().lock(), io::stdout().lock())?;
        }
    }

    Ok(())
}

/// Reads settings from the file, then applies the flags over them.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    if let Some(api) = &cli.api {
        config.api_base_url = Some(api.clone());
    }

    if let Some(timeout_ms) = cli.timeout_ms {
        config.read_timeout_ms = timeout_ms;
    }

    if let Some(event) = &cli.event {
        config.event_id = Some(event.clone());
    }

    Ok(config)
}

/// Reads a friend, cancelling the read on Ctrl-C.
async fn read_until_interrupted<R, H>(
    controller: &Arc<TapController<R, H, CliApi>>,
) -> Result<TapOutcome>
where
    R: nfc::Radio + 'static,
    H: HostEmulation + 'static,
{
    let interrupt = {
        let controller = Arc::clone(controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.cancel();
            }
        })
    };

    let outcome = controller.read_friend().await;
    interrupt.abort();

    Ok(outcome?)
}

fn print_outcome(outcome: &TapOutcome) -> Result<()> {
    match outcome {
        TapOutcome::Connected {
            friend,
            status,
            event,
        } => {
            if let Some(event) = event {
                info!("{}", event.message);
            }
            info!("{:?}", status);
            println!("{}", serde_json::to_string_pretty(friend)?);
        }
        TapOutcome::Cancelled => info!("Cancelled"),
    }

    Ok(())
}

fn respond(emulator: &Emulator, input: impl BufRead, mut output: impl Write) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = emulator.process(&hex::decode(line.replace(' ', ""))?);
        writeln!(output, "{}", hex::encode_upper(response))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_each_line() {
        let emulator = Emulator::new(&IdentityPayload::new("abc-123", "Alice"), "en").unwrap();
        let input = "00A4040007D2760000850101\n\n00A4000C02E103\n00B000000F\n";
        let mut output = Vec::new();

        respond(&emulator, input.as_bytes(), &mut output).unwrap();

        let lines: Vec<_> = String::from_utf8(output).unwrap().lines().map(String::from).collect();
        assert_eq!(3, lines.len());
        assert_eq!("9000", lines[0]);
        assert_eq!("9000", lines[1]);
        assert!(lines[2].starts_with("000F2000FF00FF0406E104"));
        assert!(lines[2].ends_with("9000"));
    }

    #[test]
    fn overrides_the_file_with_flags() {
        let cli = Cli::parse_from([
            "tapp-nfc",
            "--timeout-ms",
            "500",
            "--event",
            "event-9",
            "decode",
            "00",
        ]);

        let config = load_config(&cli).unwrap();

        assert_eq!(500, config.read_timeout_ms);
        assert_eq!(Some("event-9".to_string()), config.event_id);
        assert_eq!("en", config.language);
    }
}
