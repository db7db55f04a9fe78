// Fixtures shared by the async tests

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::Router;

/// Serve `app` on an ephemeral local port for the rest of the test
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Write an executable shell script standing in for the encoder
#[cfg(unix)]
pub fn fake_encoder(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Encoder that writes a few bytes to its last argument and succeeds
#[cfg(unix)]
pub const COPYING_ENCODER: &str = r#"for last; do :; done
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1 kb/s" >&2
echo "out_time_us=5000000"
printf 'muxed-output' > "$last"
echo "progress=end""#;

/// Encoder that fails with a diagnostic on stderr
#[cfg(unix)]
pub const FAILING_ENCODER: &str = r#"for last; do :; done
printf 'half' > "$last"
echo "Could not find tag for codec pcm in stream #0" >&2
exit 1"#;
