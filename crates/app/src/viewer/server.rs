//! Actix Web server exposing the viewer page, the MJPEG stream, one-shot
//! detection, and Prometheus metrics.
//!
//! Each `/stream.mjpg` connection gets its own streaming loop and capture
//! handle, advanced strictly pull-driven on blocking workers: the transport
//! asking for the next chunk is what makes the loop take its next frame, so a
//! slow client back-pressures acquisition and detection instead of lagging
//! behind them. Dropping the connection drops the loop, which releases the
//! capture handle.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, anyhow};
use async_stream::stream;
use frame_source::CaptureSource;
use ml_detect::{ClassTable, DetectMode, Detection, Detector, TorchDetector};
use serde::Serialize;
use tracing::{error, info};

use crate::{
    html,
    viewer::{
        LatestFrame, MjpegStream, StillDetection, StreamLoop, ViewerConfig, encoding, runtime,
        still, telemetry,
    },
};

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared state backing HTTP handlers.
struct ServerState {
    config: ViewerConfig,
    classes: ClassTable,
    /// Plain-mode detector serving the one-shot endpoints.
    still_detector: Arc<Mutex<Box<dyn Detector>>>,
    /// Display slot fed by the background preview loop, when enabled.
    preview: Option<LatestFrame>,
}

/// Handle for the background preview loop thread.
struct PreviewLoop {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl PreviewLoop {
    /// Signal the loop to stop and block until the thread exits.
    fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

#[derive(Serialize)]
struct DetectionsBody {
    count: usize,
    detections: Vec<Detection>,
}

/// Run the viewer server until the actix system shuts down.
pub fn run(config: ViewerConfig) -> Result<()> {
    let _ = telemetry::init_metrics_recorder();
    if !config.use_cpu {
        runtime::load_torch_cuda_runtime(config.verbose);
    }

    let classes = config.load_classes()?;
    info!("class table loaded ({} classes)", classes.len());

    let still_detector: Box<dyn Detector> = Box::new(TorchDetector::new(
        &config.model_path,
        config.device(),
        config.detector_size(),
        classes.clone(),
        DetectMode::Plain,
    )?);
    info!("detector loaded on {:?} for one-shot requests", config.device());

    let mut preview_loop = None;
    let preview = if config.preview {
        let slot = LatestFrame::new();
        preview_loop = Some(spawn_preview_loop(&config, &classes, slot.clone())?);
        Some(slot)
    } else {
        None
    };

    let port = config.port;
    let state = web::Data::new(ServerState {
        config,
        classes,
        still_detector: Arc::new(Mutex::new(still_detector)),
        preview,
    });

    info!("viewer available at http://127.0.0.1:{port}/ (stream at /stream.mjpg)");

    let served = actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .app_data(state.clone())
                    .app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
                    .route("/", web::get().to(index_handler))
                    .route("/stream.mjpg", web::get().to(stream_handler))
                    .route("/frame.jpg", web::get().to(frame_handler))
                    .route("/status", web::get().to(status_handler))
                    .route("/detect", web::post().to(detect_handler))
                    .route("/detections", web::post().to(detections_handler))
                    .route("/metrics", web::get().to(metrics_handler))
            })
            .bind(("0.0.0.0", port))?
            .run()
            .await
        })
        .context("viewer server failed");

    if let Some(preview_loop) = preview_loop {
        preview_loop.stop();
    }
    served
}

/// Start the background detection loop feeding the `/frame.jpg` display slot.
fn spawn_preview_loop(
    config: &ViewerConfig,
    classes: &ClassTable,
    slot: LatestFrame,
) -> Result<PreviewLoop> {
    let mut stream_loop = build_loop(config, classes)?;
    let stop = stream_loop.stop_flag();
    let handle = thread::Builder::new()
        .name("viewer-preview-loop".into())
        .spawn(move || {
            let mut sink = slot;
            match stream_loop.run(&mut sink) {
                Ok(reason) => info!("preview loop finished: {reason:?}"),
                Err(err) => error!("preview loop failed: {err}"),
            }
        })
        .context("failed to spawn preview loop thread")?;
    Ok(PreviewLoop { stop, handle })
}

/// Open the source and load a detector for one loop instance.
fn build_loop(config: &ViewerConfig, classes: &ClassTable) -> Result<StreamLoop<CaptureSource>> {
    let source = CaptureSource::open(&config.source_uri, &config.capture_config())
        .with_context(|| format!("failed to open video source {:?}", config.source_uri))?;
    let detector = TorchDetector::new(
        &config.model_path,
        config.device(),
        config.detector_size(),
        classes.clone(),
        config.mode(),
    )
    .context("failed to load detection model")?;
    Ok(StreamLoop::new(
        source,
        Box::new(detector),
        config.loop_options(),
        Arc::new(AtomicBool::new(false)),
    ))
}

/// Pull-driven chunk sequence for one stream connection.
fn build_stream(
    config: &ViewerConfig,
    classes: &ClassTable,
) -> Result<MjpegStream<CaptureSource>> {
    Ok(MjpegStream::new(
        build_loop(config, classes)?,
        config.jpeg_quality,
    ))
}

async fn index_handler() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html::INDEX_HTML)
}

/// Stream the annotated feed over a multipart response.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let config = state.config.clone();
    let classes = state.classes.clone();
    // Opening the device and loading the model both block; keep them off the
    // executor.
    let chunks = match web::block(move || build_stream(&config, &classes)).await {
        Ok(Ok(chunks)) => chunks,
        Ok(Err(err)) => {
            error!("failed to start stream: {err:#}");
            return HttpResponse::ServiceUnavailable()
                .body(format!("failed to start stream: {err:#}"));
        }
        Err(err) => {
            error!("stream setup worker failed: {err}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let body = stream! {
        let mut slot = Some(chunks);
        loop {
            let mut chunks = match slot.take() {
                Some(chunks) => chunks,
                None => break,
            };
            match web::block(move || {
                let item = chunks.next();
                (chunks, item)
            })
            .await
            {
                Ok((chunks, Some(chunk))) => {
                    slot = Some(chunks);
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(chunk));
                }
                Ok((_, None)) => break,
                Err(err) => {
                    error!("stream worker failed: {err}");
                    break;
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(body)
}

/// Serve the preview loop's most recent annotated frame.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    let Some(slot) = state.preview.as_ref() else {
        return HttpResponse::NotFound()
            .body("preview loop not enabled; start the server with --preview");
    };
    match slot.packet() {
        Some(packet) => {
            match encoding::encode_jpeg(&packet.image, state.config.jpeg_quality) {
                Ok(jpeg) => HttpResponse::Ok().content_type("image/jpeg").body(jpeg),
                Err(err) => {
                    error!("failed to encode preview frame: {err}");
                    HttpResponse::InternalServerError().finish()
                }
            }
        }
        None => HttpResponse::NoContent().finish(),
    }
}

/// Serve the preview loop's status line (FPS readout or final state).
async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    let Some(slot) = state.preview.as_ref() else {
        return HttpResponse::NotFound()
            .body("preview loop not enabled; start the server with --preview");
    };
    let status = slot.status();
    if status.is_empty() {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::Ok()
            .content_type("text/markdown; charset=utf-8")
            .body(status)
    }
}

/// One-shot detection returning the annotated JPEG.
async fn detect_handler(state: web::Data<ServerState>, body: Bytes) -> HttpResponse {
    match run_still(&state, body).await {
        Ok(result) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(result.jpeg),
        Err(err) => detection_error(err),
    }
}

/// One-shot detection returning the detection list as JSON.
async fn detections_handler(state: web::Data<ServerState>, body: Bytes) -> HttpResponse {
    match run_still(&state, body).await {
        Ok(result) => {
            let payload = DetectionsBody {
                count: result.detections.len(),
                detections: result.detections,
            };
            match serde_json::to_string(&payload) {
                Ok(json) => HttpResponse::Ok()
                    .content_type("application/json")
                    .body(json),
                Err(err) => {
                    error!("failed to serialize detections: {err}");
                    HttpResponse::InternalServerError().finish()
                }
            }
        }
        Err(err) => detection_error(err),
    }
}

async fn run_still(state: &web::Data<ServerState>, body: Bytes) -> Result<StillDetection> {
    let detector = state.still_detector.clone();
    let quality = state.config.jpeg_quality;
    web::block(move || {
        let mut guard = detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        still::detect_image(&mut **guard, &body, quality)
    })
    .await
    .context("detection worker failed")?
}

fn detection_error(err: anyhow::Error) -> HttpResponse {
    error!("one-shot detection failed: {err:#}");
    HttpResponse::BadRequest().body(format!("detection failed: {err:#}"))
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}
