//! Embedded static HTML served by the viewer, bundled into the binary so the
//! server needs no filesystem lookups.

pub(crate) const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>VisDrone Live</title>
  <style>
    body { background: #111; color: #ddd; font-family: sans-serif; text-align: center; }
    img { max-width: 96vw; border: 1px solid #333; margin-top: 1em; }
    p { color: #888; }
  </style>
</head>
<body>
  <h1>VisDrone Live</h1>
  <img src="/stream.mjpg" alt="annotated live stream">
  <p>The FPS readout is stamped on each frame. POST an image to <code>/detect</code>
     for one-shot detection, or to <code>/detections</code> for JSON results.</p>
</body>
</html>
"#;
