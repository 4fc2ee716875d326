//! On-disk artifact layout under the output directory.

use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left unescaped by `encodeURIComponent`; consumers build the
/// same file names client-side.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub const INDEX_FILE: &str = "index.json";
pub const VERIFY_FILE: &str = "_verify.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cards_dir(&self) -> PathBuf {
        self.root.join("cards")
    }

    pub fn name_dir(&self) -> PathBuf {
        self.cards_dir().join("name")
    }

    pub fn dex_dir(&self) -> PathBuf {
        self.cards_dir().join("dex")
    }

    /// `cards/index.json`, written by a fetch run.
    pub fn index_path(&self) -> PathBuf {
        self.cards_dir().join(INDEX_FILE)
    }

    /// `cards/dex/index.json`, written by a re-index run.
    pub fn dex_index_path(&self) -> PathBuf {
        self.dex_dir().join(INDEX_FILE)
    }

    pub fn verify_path(&self) -> PathBuf {
        self.cards_dir().join(VERIFY_FILE)
    }

    pub fn price_dir(&self) -> PathBuf {
        self.root.join("prices").join("card")
    }

    pub fn name_path(&self, name: &str) -> PathBuf {
        self.name_dir().join(format!("{}.json", encode_name(name)))
    }

    /// Every encoding of one dex key; all receive the same bytes.
    pub fn dex_paths(&self, dex: u32) -> Vec<PathBuf> {
        let dir = self.dex_dir();
        dex_file_stems(dex)
            .into_iter()
            .map(|stem| dir.join(format!("{stem}.json")))
            .collect()
    }

    pub fn price_path(&self, card_id: &str) -> PathBuf {
        self.price_dir().join(format!("{}.json", encode_name(card_id)))
    }
}

pub fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, URI_COMPONENT).to_string()
}

/// `None` when the decoded bytes are not UTF-8.
pub fn decode_name(encoded: &str) -> Option<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|name| name.into_owned())
}

/// Unpadded, 3-digit and 4-digit stems, without repeats (`1000` has one).
pub fn dex_file_stems(dex: u32) -> Vec<String> {
    let mut stems: Vec<String> = Vec::with_capacity(3);
    for stem in [dex.to_string(), format!("{dex:03}"), canonical_dex_stem(dex)] {
        if !stems.contains(&stem) {
            stems.push(stem);
        }
    }
    stems
}

pub fn canonical_dex_stem(dex: u32) -> String {
    format!("{dex:04}")
}
