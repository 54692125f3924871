// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test data generators.

use std::net::{IpAddr, Ipv4Addr};

/// Pool of distinct client addresses in 10.0.0.0/8.
pub fn generate_ips(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            let a = ((i >> 16) & 0xFF) as u8;
            let b = ((i >> 8) & 0xFF) as u8;
            let c = (i & 0xFF) as u8;
            IpAddr::V4(Ipv4Addr::new(10, a, b, c))
        })
        .collect()
}

/// Upload file names paired with their declared MIME types.
pub fn upload_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("photo.jpg", "image/jpeg"),
        ("clip.webm", "video/webm"),
        ("voice.m4a", "audio/mp4"),
        ("report.pdf", "application/pdf"),
        ("legacy.avi", "video/x-msvideo"),
    ]
}
