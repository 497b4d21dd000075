//! End-to-end renders through a real V8 isolate.

use sspr::{
    DetectorConfig, PreRenderOrchestrator, RenderError, RenderMode, RenderRequest, RenderSettings,
    Renderer, ThreadRenderer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use url::Url;

const ORIGIN: &str = "http://localhost:3000/";

fn page(body: &str) -> String {
    format!("<!DOCTYPE html><html><head><title>app</title></head><body><div id=\"app\"></div>{body}</body></html>")
}

fn site(files: &[(&str, &str)]) -> TempDir {
    let dir = tempdir().unwrap();
    for (name, contents) in files {
        let path = dir.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
    dir
}

fn renderer() -> ThreadRenderer {
    renderer_with(128, vec![])
}

fn renderer_with(max_heap_mb: usize, allowed_origins: Vec<String>) -> ThreadRenderer {
    ThreadRenderer::new(RenderSettings {
        detector: DetectorConfig::default(),
        max_heap_size: Some(max_heap_mb * 1024 * 1024),
        allowed_origins,
    })
}

fn request(path: &str, template: &str, root: &Path, mode: RenderMode) -> RenderRequest {
    RenderRequest {
        url: Url::parse(ORIGIN).unwrap().join(path).unwrap(),
        template_html: Arc::from(template),
        resource_root: Some(root.to_path_buf()),
        timeout: Duration::from_secs(5),
        mode,
        discover_routes: true,
    }
}

#[tokio::test]
async fn test_classic_script_output_is_serialized() {
    let dir = site(&[(
        "static/app.js",
        "document.getElementById('app').textContent = 'hello ' + location.pathname;",
    )]);
    let template = page("<script src=\"/static/app.js\"></script>");

    let output = renderer()
        .render(request("/doc", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.starts_with("<!DOCTYPE html>"));
    assert!(output.html.contains("<div id=\"app\">hello /doc</div>"));
    assert!(output.routes.is_none());
    assert_eq!(output.report.scripts, 1);
    assert!(output.report.sentinel_injected);
    assert!(!output.html.contains("data-sspr-sentinel"));
}

#[tokio::test]
async fn test_module_graph_loads_from_resource_root() {
    let dir = site(&[
        (
            "assets/main.js",
            "import { view } from './view.js';\ndocument.getElementById('app').innerHTML = view();",
        ),
        ("assets/view.js", "export const view = () => '<p class=\"x\">from module</p>';"),
    ]);
    let template = page("<script type=\"module\" src=\"/assets/main.js\"></script>");

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.contains("<p class=\"x\">from module</p>"));
}

#[tokio::test]
async fn test_build_marker_reflects_mode() {
    let dir = site(&[(
        "static/app.js",
        "document.getElementById('app').textContent = `${window.__SSR__}/${window.__SSPR_BUILD__}/${__SSPR__.isBuild}`;",
    )]);
    let template = page("<script src=\"/static/app.js\"></script>");
    let renderer = renderer();

    let build = renderer
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();
    assert!(build.html.contains("<div id=\"app\">true/true/true</div>"));

    let live = renderer
        .render(request("/", &template, dir.path(), RenderMode::Request))
        .await
        .unwrap();
    assert!(live.html.contains("<div id=\"app\">true/false/false</div>"));
}

#[tokio::test]
async fn test_registered_routes_are_returned() {
    let dir = site(&[(
        "static/app.js",
        r#"__SSPR__.registerRoutes({
            staticRoutes: [{ path: "/doc", htmlFilename: "doc.html" }],
            dynamicRoutes: [{ path: "/user/:id" }],
        });"#,
    )]);
    let template = page("<script src=\"/static/app.js\"></script>");

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    let routes = output.routes.unwrap();
    assert_eq!(routes.static_routes.len(), 1);
    assert_eq!(routes.static_routes[0].html_filename, "doc.html");
    assert_eq!(routes.dynamic_routes[0].path, "/user/:id");
}

#[tokio::test]
async fn test_legacy_routes_global_is_read() {
    let template = page(
        r#"<script>window.__SSPR_ROUTES__ = { staticRoutes: [{ path: "/about", htmlFilename: "about.html" }] };</script>"#,
    );
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    let routes = output.routes.unwrap();
    assert!(routes.find_static("/about").is_some());
}

#[tokio::test]
async fn test_shared_route_objects_survive_serialization() {
    let template = page(
        r#"<script>
            const doc = { path: "/doc", htmlFilename: "doc.html" };
            __SSPR__.registerRoutes({ dynamicRoutes: [doc], staticRoutes: [doc] });
        </script>"#,
    );
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    let routes = output.routes.unwrap();
    assert_eq!(routes.dynamic_routes[0].path, "/doc");
    assert_eq!(routes.static_routes.len(), 1);
    assert_eq!(routes.static_routes[0].html_filename, "doc.html");
}

#[tokio::test]
async fn test_route_table_is_skipped_unless_discovering() {
    let template = page(
        r#"<script>__SSPR__.registerRoutes({ staticRoutes: [{ path: "/doc", htmlFilename: "doc.html" }] });</script>"#,
    );
    let dir = site(&[]);
    let mut req = request("/doc", &template, dir.path(), RenderMode::Prerender);
    req.discover_routes = false;

    let output = renderer().render(req).await.unwrap();

    assert!(output.routes.is_none());
}

#[tokio::test]
async fn test_fetch_never_settles_but_render_does() {
    let template = page(
        r#"<script>
            document.getElementById('app').textContent = 'shell';
            fetch('/api/data').then(() => { document.body.dataset.loaded = 'yes'; });
        </script>"#,
    );
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.contains("<div id=\"app\">shell</div>"));
    assert!(!output.html.contains("data-loaded"));
    assert_eq!(output.blocked_fetches, vec!["http://localhost:3000/api/data".to_string()]);
}

#[tokio::test]
async fn test_zero_script_document_settles_without_polling() {
    let template = "<!DOCTYPE html><html><head></head><body><h1>static</h1></body></html>";
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.contains("<h1>static</h1>"));
    assert_eq!(output.report.scripts, 0);
    assert_eq!(output.report.polls, 0);
    assert!(!output.report.sentinel_injected);
}

#[tokio::test]
async fn test_done_settles_without_the_sentinel() {
    let template = page(
        r#"<script>
            document.getElementById('app').textContent = 'hydrated';
            __SSPR__.done();
        </script>"#,
    );
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.contains("<div id=\"app\">hydrated</div>"));
    assert!(!output.report.sentinel_injected);
}

#[tokio::test]
async fn test_console_is_captured() {
    let template = page("<script>console.log('rendering', 1); console.warn('careful');</script>");
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert_eq!(output.console.logs, vec!["rendering 1".to_string()]);
    assert_eq!(output.console.warns, vec!["careful".to_string()]);
}

#[tokio::test]
async fn test_missing_stylesheet_does_not_fail_the_render() {
    let template = r#"<!DOCTYPE html><html><head><link rel="stylesheet" href="/missing.css"></head><body><div id="app"></div><script>document.getElementById('app').textContent = 'styled';</script></body></html>"#;
    let dir = site(&[]);
    // Only a foreign origin is allowed, so the stylesheet is blocked locally
    let renderer = renderer_with(128, vec!["https://cdn.example.test".to_string()]);

    let output = renderer
        .render(request("/", template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.contains("<div id=\"app\">styled</div>"));
    assert!(output.html.contains("href=\"/missing.css\""));
    assert!(output
        .console
        .warns
        .iter()
        .any(|w| w.starts_with("[resource]") && w.contains("missing.css")));
}

#[tokio::test]
async fn test_navigation_is_ignored_and_counted() {
    let template = page(
        r#"<script>
            location.assign('/elsewhere');
            document.getElementById('app').textContent = 'stayed';
        </script>"#,
    );
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.contains("<div id=\"app\">stayed</div>"));
    assert!(output.console.warns.is_empty());
    assert_eq!(output.console.ignored, 1);
}

#[tokio::test]
async fn test_throwing_script_is_a_script_error() {
    let template = page("<script>throw new Error('boom');</script>");
    let dir = site(&[]);

    let err = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::Script(ref msg) if msg.contains("boom")));
}

#[tokio::test]
async fn test_marker_never_set_times_out() {
    // Replacing the global timer keeps the completion sentinel from ever firing
    let template = page("<script>window.setTimeout = () => 0;</script>");
    let dir = site(&[]);
    let mut req = request("/", &template, dir.path(), RenderMode::Prerender);
    req.timeout = Duration::from_millis(300);

    let err = renderer().render(req).await.unwrap_err();

    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_busy_script_is_stopped_at_the_timeout() {
    let template = page("<script>while (true) {}</script>");
    let dir = site(&[]);
    let mut req = request("/", &template, dir.path(), RenderMode::Prerender);
    req.timeout = Duration::from_millis(300);

    let started = std::time::Instant::now();
    let err = renderer().render(req).await.unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_heap_limit_is_a_render_error() {
    let template = page(
        "<script>const hog = []; while (true) hog.push(new Array(1e6).fill(1));</script>",
    );
    let dir = site(&[]);

    let err = renderer_with(64, vec![])
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::HeapLimit { limit_mb: 64 }), "unexpected error: {err}");
}

#[tokio::test]
async fn test_no_system_access() {
    let template = page(
        r#"<script>
            document.getElementById('app').textContent = [
                typeof Deno, typeof process, typeof require,
            ].join(',');
        </script>"#,
    );
    let dir = site(&[]);

    let output = renderer()
        .render(request("/", &template, dir.path(), RenderMode::Prerender))
        .await
        .unwrap();

    assert!(output.html.contains("<div id=\"app\">undefined,undefined,undefined</div>"));
}

#[tokio::test]
async fn test_generate_renders_every_static_route() {
    let dir = site(&[(
        "static/app.js",
        r#"
        const page = location.pathname === "/" ? "home" : location.pathname.slice(1);
        document.getElementById("app").textContent = "page:" + page;
        __SSPR__.registerRoutes({
            staticRoutes: [
                { path: "/doc", htmlFilename: "doc.html" },
                { path: "/example", htmlFilename: "example.html" },
            ],
        });
        "#,
    )]);
    let template = page("<script src=\"/static/app.js\"></script>");

    let orchestrator = PreRenderOrchestrator::new(
        renderer(),
        Url::parse(ORIGIN).unwrap(),
        Duration::from_secs(5),
    );
    let pages = orchestrator.generate(&template, Some(dir.path())).await.unwrap();

    let mut names: Vec<_> = pages.filenames().collect();
    names.sort();
    assert_eq!(names, vec!["doc.html", "example.html", "index.html"]);
    assert!(pages.get("index.html").unwrap().contains("page:home"));
    assert!(pages.get("doc.html").unwrap().contains("page:doc"));
    assert!(pages.get("example.html").unwrap().contains("page:example"));
}
