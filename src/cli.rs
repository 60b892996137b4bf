/// Command-line interface for the `minikit` binary.
use crate::config::{BindAddr, ConfigOverrides};
use crate::crypto::{Encoding, DEFAULT_KEY_CHARSET, DEFAULT_KEY_SIZE};
use crate::error::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "minikit")]
#[command(about = "Serve applications and encrypt data", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo application
    Serve(ServeArgs),
    /// List available server backends
    Backends,
    /// Print the hex digest of a file
    Digest {
        file: PathBuf,
        /// md5, sha1, sha224, sha256, sha384 or sha512
        #[arg(long, short, default_value = "sha256")]
        algorithm: String,
    },
    /// Generate a random secret key
    Keygen {
        #[arg(long, default_value_t = DEFAULT_KEY_SIZE)]
        size: usize,
        /// Character classes: a letters, u upper, l lower, n digits, p punctuation
        #[arg(long, default_value = DEFAULT_KEY_CHARSET)]
        charset: String,
    },
    /// Encrypt stdin to stdout
    Encode(CipherArgs),
    /// Decrypt stdin to stdout
    Decode(CipherArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend name (default: threaded)
    #[arg(long)]
    pub server: Option<String>,

    /// Listen host (default: 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (default: 8080)
    #[arg(long)]
    pub port: Option<u16>,

    /// Server name reported to the application
    #[arg(long)]
    pub host_name: Option<String>,

    /// User to switch to when started as root
    #[arg(long)]
    pub user: Option<String>,

    /// Group to switch to when started as root
    #[arg(long)]
    pub group: Option<String>,

    /// Worker threads (default: 10)
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CipherArgs {
    /// Passphrase the key is derived from
    #[arg(long, short)]
    pub secret: String,

    /// Text encoding of the ciphertext: base16, base32 or base64
    #[arg(long, short)]
    pub encoding: Option<Encoding>,
}

impl Cli {
    pub fn from_args() -> Self {
        Cli::parse()
    }
}

impl ServeArgs {
    /// Overrides from the configuration file (if any) with flags on top.
    pub fn overrides(&self) -> Result<ConfigOverrides> {
        let file = match &self.config {
            Some(path) => ConfigOverrides::from_file(path)?,
            None => ConfigOverrides::default(),
        };

        let bind_addr = match (&self.host, self.port) {
            (None, None) => None,
            (host, port) => {
                let base = file.bind_addr.clone().unwrap_or_default();
                Some(BindAddr::new(
                    host.clone().unwrap_or(base.host),
                    port.unwrap_or(base.port),
                ))
            }
        };

        let flags = ConfigOverrides {
            server: self.server.clone(),
            bind_addr,
            host_name: self.host_name.clone(),
            server_user: self.user.clone(),
            server_group: self.group.clone(),
            threads: self.threads,
            ..Default::default()
        };
        Ok(file.layer(flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "minikit", "-v", "serve", "--server", "evloop", "--port", "9001", "--threads", "2",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let overrides = args.overrides().unwrap();
        assert_eq!(overrides.server.as_deref(), Some("evloop"));
        assert_eq!(overrides.bind_addr, Some(BindAddr::new("127.0.0.1", 9001)));
        assert_eq!(overrides.threads, Some(2));
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": "actix", "bind_addr": ["0.0.0.0", 7000], "threads": 4}}"#).unwrap();

        let args = ServeArgs {
            config: Some(file.path().to_path_buf()),
            port: Some(7001),
            threads: Some(6),
            ..Default::default()
        };
        let overrides = args.overrides().unwrap();
        assert_eq!(overrides.server.as_deref(), Some("actix"));
        assert_eq!(overrides.bind_addr, Some(BindAddr::new("0.0.0.0", 7001)));
        assert_eq!(overrides.threads, Some(6));
    }

    #[test]
    fn test_parse_cipher_commands() {
        let cli = Cli::try_parse_from(["minikit", "encode", "--secret", "pw", "--encoding", "base32"]).unwrap();
        match cli.command {
            Command::Encode(args) => {
                assert_eq!(args.secret, "pw");
                assert_eq!(args.encoding, Some(Encoding::Base32));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["minikit", "decode", "--secret", "pw", "--encoding", "rot13"]).is_err());
    }

    #[test]
    fn test_keygen_defaults() {
        let cli = Cli::try_parse_from(["minikit", "keygen"]).unwrap();
        match cli.command {
            Command::Keygen { size, charset } => {
                assert_eq!(size, 72);
                assert_eq!(charset, "an");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
