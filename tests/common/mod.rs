//! Writes synthetic explicit VR little endian slices.
#![allow(dead_code)]

use std::{fs, path::Path};

pub const AXIAL: &str = "1\\0\\0\\0\\1\\0";

fn record(bytes: &mut Vec<u8>, group: u16, element: u16, vr: &[u8; 2], value: &[u8]) {
    bytes.extend_from_slice(&group.to_le_bytes());
    bytes.extend_from_slice(&element.to_le_bytes());
    bytes.extend_from_slice(vr);
    if vr == b"OW" {
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
    } else {
        bytes.extend_from_slice(&(value.len() as u16).to_le_bytes());
    }
    bytes.extend_from_slice(value);
}

fn text(bytes: &mut Vec<u8>, group: u16, element: u16, value: &str) {
    let mut value = value.as_bytes().to_vec();
    if value.len() % 2 == 1 {
        value.push(b' ');
    }
    record(bytes, group, element, b"DS", &value);
}

/// One 16 bit slice of `columns` x `rows` pixels, row major.
pub struct Slice<'a> {
    pub columns: u16,
    pub rows: u16,
    pub spacing: &'a str,
    pub thickness: &'a str,
    pub position: String,
    pub orientation: &'a str,
    pub pixels: Vec<u16>,
}

impl Slice<'_> {
    /// Axial slice at height `z` with 1 mm pixels and thickness.
    pub fn axial(columns: u16, rows: u16, z: f64, pixel: impl Fn(u16, u16) -> u16) -> Self {
        let pixels = (0..rows)
            .flat_map(|y| (0..columns).map(move |x| (x, y)))
            .map(|(x, y)| pixel(x, y))
            .collect();
        Slice {
            columns,
            rows,
            spacing: "1\\1",
            thickness: "1",
            position: format!("0\\0\\{z}"),
            orientation: AXIAL,
            pixels,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        text(&mut bytes, 0x0018, 0x0050, self.thickness);
        text(&mut bytes, 0x0020, 0x0032, &self.position);
        text(&mut bytes, 0x0020, 0x0037, self.orientation);
        record(&mut bytes, 0x0028, 0x0002, b"US", &1u16.to_le_bytes());
        record(&mut bytes, 0x0028, 0x0010, b"US", &self.rows.to_le_bytes());
        record(&mut bytes, 0x0028, 0x0011, b"US", &self.columns.to_le_bytes());
        text(&mut bytes, 0x0028, 0x0030, self.spacing);
        record(&mut bytes, 0x0028, 0x0100, b"US", &16u16.to_le_bytes());
        let pixels: Vec<u8> = self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        record(&mut bytes, 0x7FE0, 0x0010, b"OW", &pixels);
        bytes
    }

    pub fn write(&self, path: impl AsRef<Path>) {
        fs::write(path, self.encode()).unwrap();
    }
}
