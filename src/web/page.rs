//! Landing page

use crate::config::Resolution;
use crate::constants::STREAM_PATH;

/// Render the landing page for a given stream resolution
///
/// The output depends only on its input, so the page is rendered once at
/// startup and served byte-identical to every client.
pub fn render_index(resolution: Resolution) -> String {
    format!(
        r#"<html>
<head>
<title>Live Camera</title>
</head>
<body>
<center><h1>Live Camera</h1></center>
<center><img src="{stream}" width="{width}" height="{height}"></center>
</body>
</html>
"#,
        stream = STREAM_PATH,
        width = resolution.width,
        height = resolution.height,
    )
}
