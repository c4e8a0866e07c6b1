use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};

use crate::crypto::{self, PublicKey};
use crate::error::Error;

/// Short key identifier carried in credential headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyId(Vec<u8>);

impl KeyId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Derive the identifier of a DER-encoded signing certificate.
    pub fn for_certificate(der: &[u8]) -> Self {
        Self(crypto::key_id_for_certificate(der))
    }

    /// Parse the base64 form used by JSON trust lists.
    pub fn from_base64(s: &str) -> Result<Self, Error> {
        Ok(Self(STANDARD.decode(s)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for KeyId {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", STANDARD.encode(&self.0))
    }
}

/// A key authorized to sign credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    kid: KeyId,
    public_key: PublicKey,
    subject: Option<String>,
}

impl SigningKey {
    pub fn new(kid: KeyId, public_key: PublicKey) -> Self {
        Self {
            kid,
            public_key,
            subject: None,
        }
    }

    /// Build from a DER-encoded signing certificate; the key identifier is
    /// derived from the certificate bytes.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self, Error> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| Error::Key(format!("invalid certificate: {}", e)))?;
        let public_key = PublicKey::from_spki_der(cert.tbs_certificate.subject_pki.raw)?;
        Ok(Self {
            kid: KeyId::for_certificate(der),
            public_key,
            subject: Some(cert.subject().to_string()),
        })
    }

    /// Build from a bare SubjectPublicKeyInfo with a declared identifier.
    pub fn from_spki_der(kid: KeyId, der: &[u8]) -> Result<Self, Error> {
        Ok(Self::new(kid, PublicKey::from_spki_der(der)?))
    }

    pub fn kid(&self) -> &KeyId {
        &self.kid
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

/// One immutable version of an issuer's signing keys.
#[derive(Debug, Clone)]
pub struct TrustStore {
    generation: u64,
    keys: HashMap<KeyId, SigningKey>,
    loaded_at: DateTime<Utc>,
}

impl TrustStore {
    /// The store published before anything is loaded. Every lookup misses.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            keys: HashMap::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Build a store from parsed keys.
    ///
    /// Identical duplicates collapse. When two different keys claim the same
    /// identifier the first one wins and the conflict is logged.
    pub fn from_keys(keys: impl IntoIterator<Item = SigningKey>) -> Self {
        let mut map: HashMap<KeyId, SigningKey> = HashMap::new();
        for key in keys {
            match map.get(&key.kid) {
                Some(existing) if existing.public_key == key.public_key => {}
                Some(_) => {
                    log::warn!(
                        "Conflicting keys for kid {}; keeping the first one",
                        key.kid
                    );
                }
                None => {
                    map.insert(key.kid.clone(), key);
                }
            }
        }
        Self {
            generation: 0,
            keys: map,
            loaded_at: Utc::now(),
        }
    }

    pub fn get(&self, kid: &[u8]) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn contains(&self, kid: &[u8]) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SigningKey> {
        self.keys.values()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// The current trust store, shared between one writer and many readers.
///
/// Readers take an `Arc` snapshot and keep it for the whole validation;
/// the writer replaces the snapshot with a single atomic swap.
#[derive(Debug, Clone)]
pub struct SharedTrustStore {
    inner: Arc<ArcSwap<TrustStore>>,
}

impl SharedTrustStore {
    pub fn new(store: TrustStore) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(store)),
        }
    }

    /// Lock-free read of the latest published snapshot.
    pub fn current(&self) -> Arc<TrustStore> {
        self.inner.load_full()
    }

    /// Publish a new snapshot, stamping it with the next generation number.
    pub fn publish(&self, store: TrustStore) -> Arc<TrustStore> {
        let mut published = None;
        self.inner.rcu(|current| {
            let mut next = store.clone();
            next.generation = current.generation + 1;
            let next = Arc::new(next);
            published = Some(Arc::clone(&next));
            next
        });
        published.unwrap_or_else(|| self.current())
    }
}

impl Default for SharedTrustStore {
    fn default() -> Self {
        Self::new(TrustStore::empty())
    }
}
