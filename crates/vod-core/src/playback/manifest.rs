use m3u8_rs::Playlist;
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// One encoded rendition of the content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityLevel {
    pub index: usize,
    pub vertical_resolution: Option<u64>,
    /// Declared peak bandwidth in bits per second.
    pub bitrate: u64,
    pub name: String,
    /// Media playlist URL, resolved against the manifest URL.
    pub uri: String,
    pub codecs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub url: String,
    /// Ordered by ascending bitrate; `levels[i].index == i`.
    pub levels: Vec<QualityLevel>,
    /// Known only when the manifest itself is a media playlist.
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest {url}: {message}")]
    Parse { url: String, message: String },
    #[error("manifest {url} declares no playable quality levels")]
    NoLevels { url: String },
    #[error("invalid manifest URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Parses an HLS manifest into its quality levels.
///
/// A master playlist yields one level per non-I-frame variant. A media
/// playlist yields a single level pointing at itself.
pub fn parse_manifest(url: &str, body: &str) -> Result<Manifest, ManifestError> {
    let base = Url::parse(url).map_err(|source| ManifestError::Url {
        url: url.to_string(),
        source,
    })?;

    let playlist = match m3u8_rs::parse_playlist(body.as_bytes()) {
        Ok((_, playlist)) => playlist,
        Err(e) => {
            return Err(ManifestError::Parse {
                url: url.to_string(),
                message: e.to_string(),
            })
        }
    };

    match playlist {
        Playlist::MasterPlaylist(master) => {
            let mut levels: Vec<QualityLevel> = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .map(|v| {
                    let height = v.resolution.as_ref().map(|r| r.height);
                    QualityLevel {
                        index: 0,
                        vertical_resolution: height,
                        bitrate: v.bandwidth,
                        name: level_name(height, v.bandwidth),
                        uri: resolve(&base, &v.uri),
                        codecs: v.codecs.clone(),
                    }
                })
                .collect();
            if levels.is_empty() {
                return Err(ManifestError::NoLevels {
                    url: url.to_string(),
                });
            }
            levels.sort_by_key(|l| (l.bitrate, l.vertical_resolution));
            for (i, level) in levels.iter_mut().enumerate() {
                level.index = i;
            }
            Ok(Manifest {
                url: url.to_string(),
                levels,
                duration_secs: None,
            })
        }
        Playlist::MediaPlaylist(media) => {
            let duration: f64 = media.segments.iter().map(|s| f64::from(s.duration)).sum();
            Ok(Manifest {
                url: url.to_string(),
                levels: vec![QualityLevel {
                    index: 0,
                    vertical_resolution: None,
                    bitrate: 0,
                    name: "default".to_string(),
                    uri: url.to_string(),
                    codecs: None,
                }],
                duration_secs: Some(duration),
            })
        }
    }
}

fn level_name(height: Option<u64>, bitrate: u64) -> String {
    match height {
        Some(h) => format!("{h}p"),
        None => format!("{}kbps", bitrate / 1000),
    }
}

fn resolve(base: &Url, uri: &str) -> String {
    base.join(uri)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| uri.to_string())
}
