use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::persistence::{JsonFile, PersistFailureHandler};

/// One banned expression: lowercase tokens in the order the admin typed them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phrase(Vec<String>);

impl Phrase {
    /// Lowercases the tokens and splits them on whitespace, so `["buy now"]`
    /// becomes `["buy", "now"]`. `None` when nothing is left.
    pub fn normalize<I, S>(tokens: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .flat_map(|token| {
                token
                    .as_ref()
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        (!tokens.is_empty()).then_some(Self(tokens))
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// A single token must equal a whole word of the message. Several tokens
    /// match when each one occurs anywhere in the lowercased text, in any
    /// order and not necessarily adjacent.
    fn matches(&self, lowercase_text: &str, words: &[&str]) -> bool {
        match self.0.as_slice() {
            [single] => words.iter().any(|word| word == single),
            tokens => tokens
                .iter()
                .all(|token| lowercase_text.contains(token.as_str())),
        }
    }
}

impl fmt::Display for Phrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PhraseFile {
    #[serde(default)]
    phrases: Vec<Phrase>,
}

pub struct PhraseStore {
    phrases: RwLock<Vec<Phrase>>,
    file: JsonFile,
    failures: Arc<dyn PersistFailureHandler>,
}

impl PhraseStore {
    pub async fn open(file: JsonFile, failures: Arc<dyn PersistFailureHandler>) -> Self {
        let phrases = match file.load::<PhraseFile>().await {
            Ok(Some(stored)) => dedupe(stored.phrases),
            Ok(None) => Vec::new(),
            Err(error) => {
                failures.load_failed(file.path(), &error);
                Vec::new()
            }
        };
        info!(
            path = %file.path().display(),
            count = phrases.len(),
            "loaded blacklist phrases"
        );

        Self {
            phrases: RwLock::new(phrases),
            file,
            failures,
        }
    }

    /// Appends the phrase unless an identical token sequence is already
    /// stored. Returns whether it was added.
    pub async fn add_phrase<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        let Some(phrase) = Phrase::normalize(tokens) else {
            return false;
        };

        let mut phrases = self.phrases.write().await;
        if phrases.contains(&phrase) {
            debug!(%phrase, "blacklist phrase already present");
            return false;
        }

        phrases.push(phrase.clone());
        info!(%phrase, total = phrases.len(), "added blacklist phrase");
        self.persist(&phrases).await;
        true
    }

    /// Removes the first phrase with exactly these tokens (order-sensitive,
    /// case-insensitive).
    pub async fn remove_phrase<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        let Some(target) = Phrase::normalize(tokens) else {
            return false;
        };

        let mut phrases = self.phrases.write().await;
        let Some(index) = phrases.iter().position(|phrase| *phrase == target) else {
            debug!(phrase = %target, "blacklist phrase not found");
            return false;
        };

        phrases.remove(index);
        info!(phrase = %target, total = phrases.len(), "removed blacklist phrase");
        self.persist(&phrases).await;
        true
    }

    pub async fn check_message(&self, text: &str) -> bool {
        self.find_match(text).await.is_some()
    }

    /// The first stored phrase the text trips, in insertion order.
    pub async fn find_match(&self, text: &str) -> Option<Phrase> {
        let lowercase = text.to_lowercase();
        let words = lowercase.split_whitespace().collect::<Vec<_>>();

        let phrases = self.phrases.read().await;
        let hit = phrases
            .iter()
            .find(|phrase| phrase.matches(&lowercase, &words))
            .cloned();
        if let Some(phrase) = &hit {
            debug!(%phrase, "blacklisted phrase detected");
        }
        hit
    }

    pub async fn list(&self) -> Vec<Phrase> {
        self.phrases.read().await.clone()
    }

    async fn persist(&self, phrases: &[Phrase]) {
        let snapshot = PhraseFile {
            phrases: phrases.to_vec(),
        };
        if let Err(error) = self.file.save(&snapshot).await {
            self.failures.save_failed(self.file.path(), &error);
        }
    }
}

fn dedupe(stored: Vec<Phrase>) -> Vec<Phrase> {
    let mut phrases: Vec<Phrase> = Vec::with_capacity(stored.len());
    for phrase in stored {
        let Some(phrase) = Phrase::normalize(phrase.tokens()) else {
            continue;
        };
        if phrases.contains(&phrase) {
            warn!(%phrase, "dropping duplicate blacklist phrase from store file");
            continue;
        }
        phrases.push(phrase);
    }
    phrases
}
