use log::{debug, info};
use rouille::{Request, Response, input::multipart};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{path::Path, sync::Arc};

use crate::{
    config::HttpConfig,
    control::{Command, ControlHandle, LinkHealth, PlayerStatus},
    domain::{link::Link, tag::TagId},
    http::error::ApiError,
    storage::links::{JsonFile, LinkFile},
};

/// multipart field carrying an uploaded song
const UPLOAD_FIELD: &str = "file";

pub struct HttpServer<F = JsonFile> {
    control: Arc<ControlHandle<F>>,
    pub config: HttpConfig,
}

impl<F: LinkFile + 'static> HttpServer<F> {
    pub fn new(control: Arc<ControlHandle<F>>, config: HttpConfig) -> Self {
        Self { control, config }
    }

    pub fn run(self) {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        rouille::start_server(addr, move |request| self.handle_request(request));
    }

    fn handle_request(&self, request: &Request) -> Response {
        Self::log_request(request);

        let response = rouille::router!(request,
            (GET) (/) => {
                Response::html(include_str!("../../html/index.html"))
            },

            (GET) (/api/status) => {
                self.handle_status()
            },

            (GET) (/api/songs) => {
                respond(self.list_songs())
            },
            (POST) (/api/songs/upload) => {
                respond(self.upload_song(request))
            },
            (GET) (/api/songs/{name: String}) => {
                self.handle_get_song(&name)
            },
            (DELETE) (/api/songs/{name: String}) => {
                respond(self.delete_song(&name))
            },

            (GET) (/api/tags) => {
                self.handle_list_tags()
            },
            (POST) (/api/tags/link) => {
                respond(self.link_tag(request))
            },
            (GET) (/api/tags/scan) => {
                self.handle_scan()
            },
            (POST) (/api/tags/scan/clear) => {
                self.control.clear_detection();
                success()
            },
            (DELETE) (/api/tags/{uid: String}) => {
                respond(self.unlink_tag(&uid))
            },

            (POST) (/api/player/play) => {
                respond(self.play(request))
            },
            (POST) (/api/player/pause) => {
                respond(self.send(Command::Pause))
            },
            (POST) (/api/player/resume) => {
                respond(self.send(Command::Resume))
            },
            (POST) (/api/player/stop) => {
                respond(self.send(Command::Stop))
            },
            (POST) (/api/player/volume) => {
                respond(self.set_volume(request))
            },

            _ => ApiError::NotFound("not found".into()).into_response()
        );

        info!("Response: {} {}", request.method(), response.status_code);
        response
    }

    fn log_request(request: &Request) {
        info!("{} {}", request.method(), request.url());
    }

    fn handle_status(&self) -> Response {
        Response::json(&StatusResponse {
            player: self.control.status(),
            reader: self.control.reader_enabled(),
            links: self.control.links.all().len(),
            link_file: self.control.link_health(),
        })
    }

    fn list_songs(&self) -> Result<Response, ApiError> {
        let songs = self.control.library.list_songs()?;
        Ok(Response::json(&SongsResponse { songs }))
    }

    fn handle_get_song(&self, name: &str) -> Response {
        match self.control.library.open_song(name) {
            Ok((file, path)) => {
                let mime = mime_for_song(&path);
                debug!("STREAM {name}, MIME type: {mime}");
                Response::from_file(mime, file)
            }
            Err(e) => ApiError::from(e).into_response(),
        }
    }

    fn upload_song(&self, request: &Request) -> Result<Response, ApiError> {
        let mut input = multipart::get_multipart_input(request)
            .map_err(|e| ApiError::BadRequest(format!("expected a multipart upload: {e}")))?;

        while let Some(mut field) = input.next() {
            if &*field.headers.name != UPLOAD_FIELD {
                continue;
            }
            let name = field
                .headers
                .filename
                .clone()
                .ok_or_else(|| ApiError::BadRequest("upload has no file name".into()))?;

            let size = self.control.library.save_song(&name, &mut field.data)?;
            return Ok(Response::json(&json!({
                "success": true,
                "song": name,
                "size": size,
            })));
        }
        Err(ApiError::BadRequest(format!(
            "missing multipart field {UPLOAD_FIELD:?}"
        )))
    }

    fn delete_song(&self, name: &str) -> Result<Response, ApiError> {
        self.control.library.delete_song(name)?;
        Ok(success())
    }

    fn handle_list_tags(&self) -> Response {
        Response::json(&TagsResponse {
            tags: self.control.links.all(),
        })
    }

    fn link_tag(&self, request: &Request) -> Result<Response, ApiError> {
        let body: LinkRequest = json_body(request)?;
        let uid = TagId::parse(&body.uid)?;
        let song = body.song.trim();
        if song.is_empty() {
            return Err(ApiError::BadRequest("no song given".into()));
        }

        self.control.links.link(uid, song)?;
        self.control.set_link_health(LinkHealth::Ok);
        Ok(success())
    }

    fn unlink_tag(&self, uid: &str) -> Result<Response, ApiError> {
        let uid = TagId::parse(uid)?;
        let removed = self.control.links.unlink(&uid)?;
        if removed {
            self.control.set_link_health(LinkHealth::Ok);
        }
        Ok(Response::json(&json!({ "success": true, "removed": removed })))
    }

    fn handle_scan(&self) -> Response {
        let detection = self.control.last_detection();
        Response::json(&ScanResponse {
            detected: detection.is_some(),
            uid: detection.as_ref().map(|d| d.uid.to_string()),
            at: detection.map(|d| d.at),
        })
    }

    fn play(&self, request: &Request) -> Result<Response, ApiError> {
        let body: PlayRequest = json_body(request)?;
        if !self.control.library.song_exists(&body.song) {
            return Err(ApiError::NotFound(format!("song {} not found", body.song)));
        }
        self.send(Command::Play { song: body.song })
    }

    fn set_volume(&self, request: &Request) -> Result<Response, ApiError> {
        let body: VolumeRequest = json_body(request)?;
        if !body.volume.is_finite() {
            return Err(ApiError::BadRequest("volume must be a number".into()));
        }
        self.send(Command::SetVolume(body.volume))
    }

    fn send(&self, command: Command) -> Result<Response, ApiError> {
        if self.control.send(command) {
            Ok(success())
        } else {
            Err(ApiError::Unavailable("player is not running".into()))
        }
    }
}

fn respond(result: Result<Response, ApiError>) -> Response {
    result.unwrap_or_else(ApiError::into_response)
}

fn success() -> Response {
    Response::json(&json!({ "success": true }))
}

fn json_body<T: serde::de::DeserializeOwned>(request: &Request) -> Result<T, ApiError> {
    rouille::input::json_input(request)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn mime_for_song(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg".to_string(),
        Some("wav") => "audio/wav".to_string(),
        Some("flac") => "audio/flac".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(flatten)]
    player: PlayerStatus,
    /// whether a tag reader is attached
    reader: bool,
    links: usize,
    link_file: LinkHealth,
}

#[derive(Serialize, Deserialize)]
struct SongsResponse {
    songs: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct TagsResponse {
    tags: Vec<Link>,
}

#[derive(Serialize, Deserialize)]
struct ScanResponse {
    uid: Option<String>,
    detected: bool,
    at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Deserialize)]
struct LinkRequest {
    uid: String,
    song: String,
}

#[derive(Deserialize)]
struct PlayRequest {
    song: String,
}

#[derive(Deserialize)]
struct VolumeRequest {
    volume: f32,
}

#[cfg(test)]
pub fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: rouille::Response,
) -> anyhow::Result<T> {
    Ok(serde_json::from_reader(
        response.data.into_reader_and_size().0,
    )?)
}
