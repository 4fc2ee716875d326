use std::fs;

use crate::index::layout::{canonical_dex_stem, decode_name, encode_name, ArtifactLayout, INDEX_FILE, VERIFY_FILE};

const CACHE_HEADERS: &[(&str, &str)] = &[
    ("cache-control", "public, max-age=3600"),
    ("access-control-allow-origin", "*"),
];

pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    fn json(body: String) -> Self {
        Self {
            status_code: 200,
            status_text: "OK",
            content_type: "application/json; charset=utf-8",
            body,
        }
    }

    /// Caching and CORS headers; only successful responses carry them.
    pub fn extra_headers(&self) -> &'static [(&'static str, &'static str)] {
        if (200..300).contains(&self.status_code) {
            CACHE_HEADERS
        } else {
            &[]
        }
    }
}

/// Read-only view of the artifact tree the proxy serves from.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ArtifactLayout,
}

impl ArtifactStore {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    fn name_artifact(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.layout.name_path(name)).ok()
    }

    /// Spelling variants in lookup order: as given, apostrophes swapped,
    /// then a case-insensitive match against the names on disk.
    fn resolve_name(&self, name: &str) -> Option<String> {
        let straight = name.replace('\u{2019}', "'");
        let curly = name.replace('\'', "\u{2019}");
        for candidate in [name, straight.as_str(), curly.as_str()] {
            if let Some(body) = self.name_artifact(candidate) {
                return Some(body);
            }
        }

        let wanted = fold(name);
        let mut stems: Vec<String> = fs::read_dir(self.layout.name_dir())
            .ok()?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let file = entry.file_name();
                let stem = file.to_str()?.strip_suffix(".json")?;
                (stem != "index").then(|| stem.to_string())
            })
            .collect();
        stems.sort();
        stems
            .iter()
            .filter_map(|stem| decode_name(stem))
            .find(|on_disk| fold(on_disk) == wanted)
            .and_then(|on_disk| self.name_artifact(&on_disk))
    }

    fn dex_artifact(&self, digits: &str) -> Option<String> {
        let dex: u32 = digits.parse().ok()?;
        let path = self.layout.dex_dir().join(format!("{}.json", canonical_dex_stem(dex)));
        fs::read_to_string(path).ok()
    }

    fn cards_file(&self, file: &str) -> Option<String> {
        fs::read_to_string(self.layout.cards_dir().join(file)).ok()
    }
}

fn fold(name: &str) -> String {
    name.replace('\u{2019}', "'").to_lowercase()
}

pub fn route_request(store: &ArtifactStore, method: &str, path: &str) -> HttpResponse {
    if method != "GET" {
        return error_response(405, "Method Not Allowed", "only GET is supported");
    }
    let path = path.split('?').next().unwrap_or(path);

    let found = match path.strip_prefix("/cards/") {
        Some(INDEX_FILE) => store.cards_file(INDEX_FILE),
        Some(VERIFY_FILE) => store.cards_file(VERIFY_FILE),
        Some(rest) => {
            if let Some(id) = rest.strip_prefix("dex/").and_then(|f| f.strip_suffix(".json")) {
                if id == "index" {
                    fs::read_to_string(store.layout.dex_index_path()).ok()
                } else if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
                    store.dex_artifact(id)
                } else {
                    return error_response(404, "Not Found", &format!("invalid dex id '{id}'"));
                }
            } else if let Some(encoded) = rest.strip_prefix("name/").and_then(|f| f.strip_suffix(".json")) {
                match decode_name(encoded).filter(|name| !name.is_empty()) {
                    Some(name) => store.resolve_name(&name),
                    None => return error_response(404, "Not Found", "invalid name"),
                }
            } else {
                None
            }
        }
        None => None,
    };

    match found {
        Some(body) => HttpResponse::json(body),
        None => error_response(404, "Not Found", &format!("no artifact for {path}")),
    }
}

pub fn error_response(status_code: u16, status_text: &'static str, message: &str) -> HttpResponse {
    HttpResponse {
        status_code,
        status_text,
        content_type: "application/json",
        body: format!(
            "{{\n  \"status\": \"error\",\n  \"message\": {}\n}}",
            serde_json::to_string(message).unwrap_or_else(|_| "\"Unknown error\"".to_string())
        ),
    }
}

/// Canonical request path for a name artifact.
pub fn name_route(name: &str) -> String {
    format!("/cards/name/{}.json", encode_name(name))
}
