//! Ed25519 key pair on disk.
//!
//! Private key as PKCS#8 PEM (mode 0600 on unix), public key as SPKI PEM.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};

use crate::canonical::sha256_prefixed;
use crate::error::SigningError;

pub const PRIVATE_KEY_FILE: &str = "ed25519_private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "ed25519_public_key.pem";

/// Directory-scoped key store.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.ztxp`, when a home directory can be determined.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ztxp"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    /// Load the signing key, generating a pair on first use.
    pub fn load_or_generate(&self) -> Result<SigningKey, SigningError> {
        if self.private_key_path().exists() {
            return self.load_signing_key();
        }
        tracing::info!(
            dir = %self.dir.display(),
            "no signing key found, generating ed25519 key pair"
        );
        self.generate(false)
    }

    /// Generate and persist a fresh key pair.
    ///
    /// Refuses to overwrite an existing key unless `force` is set.
    pub fn generate(&self, force: bool) -> Result<SigningKey, SigningError> {
        let private_path = self.private_key_path();
        let public_path = self.public_key_path();

        if !force {
            for path in [&private_path, &public_path] {
                if path.exists() {
                    return Err(SigningError::KeyExists {
                        path: path.display().to_string(),
                    });
                }
            }
        }

        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let signing_key = SigningKey::generate(&mut rand::thread_rng());

        let private_pem =
            signing_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| SigningError::Unavailable {
                    reason: format!("failed to encode private key as PKCS#8 PEM: {}", e),
                })?;
        let public_pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::Unavailable {
                reason: format!("failed to encode public key as SPKI PEM: {}", e),
            })?;

        fs::write(&private_path, private_pem.as_bytes()).map_err(|e| io_error(&private_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| io_error(&private_path, e))?;
        }

        fs::write(&public_path, public_pem).map_err(|e| io_error(&public_path, e))?;

        Ok(signing_key)
    }

    pub fn load_signing_key(&self) -> Result<SigningKey, SigningError> {
        let path = self.private_key_path();
        let pem = read_key_file(&path)?;
        SigningKey::from_pkcs8_pem(&pem).map_err(|e| SigningError::Unavailable {
            reason: format!("invalid private key {}: {}", path.display(), e),
        })
    }

    pub fn load_verifying_key(&self) -> Result<VerifyingKey, SigningError> {
        let path = self.public_key_path();
        let pem = read_key_file(&path)?;
        VerifyingKey::from_public_key_pem(&pem).map_err(|e| SigningError::Unavailable {
            reason: format!("invalid public key {}: {}", path.display(), e),
        })
    }

    /// `sha256:<hex>` over the SPKI DER encoding of the public key.
    pub fn compute_key_id(key: &VerifyingKey) -> Result<String, SigningError> {
        let der = key
            .to_public_key_der()
            .map_err(|e| SigningError::Unavailable {
                reason: format!("failed to encode public key as SPKI DER: {}", e),
            })?;
        Ok(sha256_prefixed(der.as_bytes()))
    }
}

fn read_key_file(path: &Path) -> Result<String, SigningError> {
    match fs::read_to_string(path) {
        Ok(pem) => Ok(pem),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SigningError::KeyNotFound {
            key_ref: path.display().to_string(),
        }),
        Err(e) => Err(io_error(path, e)),
    }
}

fn io_error(path: &Path, err: std::io::Error) -> SigningError {
    SigningError::Unavailable {
        reason: format!("{}: {}", path.display(), err),
    }
}
