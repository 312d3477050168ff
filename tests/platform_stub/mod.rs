#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read as _;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

pub const COURSE_ID: &str = "demo-001";
/// A second course with one lecture holding two same-sized files.
pub const TWINS_COURSE_ID: &str = "twins-001";
pub const USERNAME: &str = "student@example.com";
pub const PASSWORD: &str = "hunter2-stub";
const CSRF_TOKEN: &str = "tok123";

/// Media served under `/media/`, with their exact sizes.
pub const MEDIA: &[(&str, usize)] = &[
    ("welcome.mp4", 1000),
    ("welcome.pdf", 300),
    ("welcome.srt", 50),
    ("a.pdf", 200),
    ("c.pdf", 220),
    ("lecture-2.mp4", 400),
    ("lecture-3.mp4", 410),
    ("lecture-4.mp4", 420),
    ("week1.pdf", 100),
    ("week2.pdf", 100),
];
pub const SLIDES_SIZE: usize = 120;

#[derive(Debug, Clone, Default)]
pub struct PlatformStubConfig {
    /// About endpoint answers 500.
    pub broken_about: bool,
    /// Lecture index without any week section.
    pub empty_index: bool,
}

/// A tiny stand-in for the course platform. Serves one course, `demo-001`:
///
/// ```text
/// Zebra Topics
///   Welcome (7:02)   welcome.mp4, welcome.pdf, welcome.srt
///   Deep Dive        a.pdf, broken.pdf (always 500), c.pdf; video on its page
/// Apple Topics
///   Quiz review      no resources; video on its page
///   Slides only      /download?id=slides named by Content-Disposition; video on its page
/// ```
pub struct PlatformStub {
    pub base_url: String,
    requests: Arc<Mutex<HashMap<String, usize>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PlatformStub {
    pub fn spawn(config: PlatformStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start platform stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let base_url = base_url.clone();
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let url = request.url().to_string();
                    *requests
                        .lock()
                        .expect("request log lock")
                        .entry(url.clone())
                        .or_default() += 1;

                    let response = if request.method() == &tiny_http::Method::Post {
                        let mut body = String::new();
                        let _ = request.as_reader().read_to_string(&mut body);
                        login_response(&request, &url, &body)
                    } else {
                        get_response(&config, &base_url, &url)
                    };
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// How often `path_and_query` was requested.
    pub fn requests(&self, path_and_query: &str) -> usize {
        self.requests
            .lock()
            .expect("request log lock")
            .get(path_and_query)
            .copied()
            .unwrap_or_default()
    }
}

impl Drop for PlatformStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

type StubResponse = tiny_http::Response<std::io::Cursor<Vec<u8>>>;

pub fn media_body(name: &str) -> Option<Vec<u8>> {
    let (_, size) = MEDIA.iter().find(|(media, _)| *media == name)?;
    let fill = name.bytes().next().unwrap_or(b'x');
    Some(vec![fill; *size])
}

fn header(name: &str, value: &str) -> tiny_http::Header {
    tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("build header")
}

fn html(body: String) -> StubResponse {
    tiny_http::Response::from_data(body.into_bytes())
        .with_header(header("Content-Type", "text/html; charset=utf-8"))
}

fn status(code: u16) -> StubResponse {
    tiny_http::Response::from_data(format!("status {code}").into_bytes()).with_status_code(code)
}

fn get_response(config: &PlatformStubConfig, base_url: &str, url: &str) -> StubResponse {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    if let Some(name) = path.strip_prefix("/media/") {
        if name == "broken.pdf" {
            return status(500);
        }
        return match media_body(name) {
            Some(body) => tiny_http::Response::from_data(body)
                .with_header(header("Content-Type", "application/octet-stream")),
            None => status(404),
        };
    }

    match path {
        "/demo-001/lecture/index" => {
            let page = if config.empty_index {
                "<html><body><p>Please accept the honour code.</p></body></html>".to_owned()
            } else {
                lecture_index(base_url)
            };
            html(page).with_header(header(
                "Set-Cookie",
                &format!("csrf_token={CSRF_TOKEN}; Path=/"),
            ))
        }
        "/twins-001/lecture/index" => html(twins_index()).with_header(header(
            "Set-Cookie",
            &format!("csrf_token={CSRF_TOKEN}; Path=/"),
        )),
        "/demo-001/class/index" => html("<html><body><h1>Demo course</h1></body></html>".to_owned()),
        "/demo-001/lecture/view" => {
            let Some(id) = query.strip_prefix("lecture_id=") else {
                return status(404);
            };
            html(format!(
                r#"<html><body><video><source type="video/mp4" src="/media/lecture-{id}.mp4"></video></body></html>"#
            ))
        }
        "/download" if query == "id=slides" => {
            tiny_http::Response::from_data(vec![b's'; SLIDES_SIZE]).with_header(header(
                "Content-Disposition",
                r#"attachment; filename="Apple slides.pdf""#,
            ))
        }
        "/maestro/api/topic/information" => {
            if config.broken_about {
                return status(500);
            }
            tiny_http::Response::from_data(
                br#"{"name":"Demo course","instructor":"A. Teacher"}"#.to_vec(),
            )
            .with_header(header("Content-Type", "application/json"))
        }
        _ => status(404),
    }
}

fn login_response(request: &tiny_http::Request, url: &str, body: &str) -> StubResponse {
    if url != "/api/v1/login" {
        return status(404);
    }

    let header_value = |name: &'static str| {
        request
            .headers()
            .iter()
            .find(|h| h.field.equiv(name))
            .map(|h| h.value.as_str().to_owned())
            .unwrap_or_default()
    };
    if header_value("X-CSRFToken") != CSRF_TOKEN
        || !header_value("Cookie").contains(&format!("csrftoken={CSRF_TOKEN}"))
    {
        return status(403);
    }

    let form: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    let authorized = form.get("email").map(String::as_str) == Some(USERNAME)
        && form.get("password").map(String::as_str) == Some(PASSWORD);
    if !authorized {
        return status(401);
    }

    tiny_http::Response::from_data(b"{}".to_vec())
        .with_header(header("Set-Cookie", "CAUTH=stub-session; Path=/"))
}

fn lecture_index(base_url: &str) -> String {
    format!(
        r#"<!doctype html>
<html><body>
<div class="course-item-list">
<div class="course-item-list-header"><h3>Zebra Topics</h3></div>
<ul class="course-item-list-section-list">
  <li>
    <a class="lecture-link" data-modal-iframe="view?lecture_id=1">Welcome (7:02)</a>
    <div class="course-lecture-item-resource">
      <a href="/media/welcome.mp4">Video</a>
      <a href="../../media/welcome.pdf">Slides</a>
      <a href="{base_url}/media/welcome.srt">Subtitles</a>
    </div>
  </li>
  <li>
    <a class="lecture-link" data-modal-iframe="view?lecture_id=2">Deep Dive</a>
    <div class="course-lecture-item-resource">
      <a href="/media/a.pdf">A</a>
      <a href="/media/broken.pdf">B</a>
      <a href="/media/c.pdf">C</a>
    </div>
  </li>
</ul>
<div class="course-item-list-header"><h3>Apple Topics</h3></div>
<ul class="course-item-list-section-list">
  <li>
    <a class="lecture-link" data-modal-iframe="view?lecture_id=3">Quiz review</a>
    <div class="course-lecture-item-resource"></div>
  </li>
  <li>
    <a class="lecture-link" data-modal-iframe="view?lecture_id=4">Slides only</a>
    <div class="course-lecture-item-resource">
      <a href="/download?id=slides">Slides</a>
    </div>
  </li>
</ul>
</div>
</body></html>
"#
    )
}

fn twins_index() -> String {
    r#"<!doctype html>
<html><body>
<div class="course-item-list-header"><h3>Handouts</h3></div>
<ul class="course-item-list-section-list">
  <li>
    <a class="lecture-link" data-modal-iframe="view?lecture_id=9">Weekly sheets</a>
    <div class="course-lecture-item-resource">
      <a href="/media/week1.pdf">Week 1</a>
      <a href="/media/week2.pdf">Week 2</a>
    </div>
  </li>
</ul>
</body></html>
"#
    .to_owned()
}
