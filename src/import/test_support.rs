//! Fixture builders shared by the import tests.
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Encode a blank RGB image of the given size as JPEG bytes.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(width, height);
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, jpeg_bytes(width, height)).unwrap();
}

/// Build an APP1 segment (marker, length and payload) holding a little-endian
/// TIFF block with DateTimeOriginal in the Exif sub-IFD and, optionally,
/// ImageDescription in IFD0.
///
///   0-7:    header ("II" + 0x002A + IFD0 offset=8)
///   8..:    IFD0: [ImageDescription], ExifIFD pointer (0x8769)
///   then:   ExifIFD: DateTimeOriginal (0x9003), 20 bytes
///   then:   DateTimeOriginal value, then description value if not inline
pub fn exif_app1(datetime_original: &str, description: Option<&str>) -> Vec<u8> {
    assert_eq!(
        datetime_original.len(),
        19,
        "EXIF datetime must be 'YYYY:MM:DD HH:MM:SS'"
    );
    let mut dt_bytes = datetime_original.as_bytes().to_vec();
    dt_bytes.push(0);
    let desc_bytes = description.map(|d| {
        let mut v = d.as_bytes().to_vec();
        v.push(0);
        v
    });

    let ifd0_entries: u16 = if desc_bytes.is_some() { 2 } else { 1 };
    let ifd0_len = 2 + 12 * ifd0_entries as u32 + 4;
    let exif_ifd_offset = 8 + ifd0_len;
    let exif_ifd_len = 2 + 12 + 4;
    let dt_offset = exif_ifd_offset + exif_ifd_len;
    let desc_offset = dt_offset + dt_bytes.len() as u32;

    let mut tiff: Vec<u8> = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&[0x2A, 0x00]);
    tiff.extend_from_slice(&8u32.to_le_bytes());

    tiff.extend_from_slice(&ifd0_entries.to_le_bytes());
    if let Some(desc) = &desc_bytes {
        tiff.extend_from_slice(&0x010Eu16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        if desc.len() <= 4 {
            let mut inline = desc.clone();
            inline.resize(4, 0);
            tiff.extend_from_slice(&inline);
        } else {
            tiff.extend_from_slice(&desc_offset.to_le_bytes());
        }
    }
    tiff.extend_from_slice(&0x8769u16.to_le_bytes());
    tiff.extend_from_slice(&4u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&exif_ifd_offset.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    assert_eq!(tiff.len() as u32, exif_ifd_offset);
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x9003u16.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    tiff.extend_from_slice(&(dt_bytes.len() as u32).to_le_bytes());
    tiff.extend_from_slice(&dt_offset.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    assert_eq!(tiff.len() as u32, dt_offset);
    tiff.extend_from_slice(&dt_bytes);
    if let Some(desc) = &desc_bytes {
        if desc.len() > 4 {
            tiff.extend_from_slice(desc);
        }
    }

    let mut payload = b"Exif\x00\x00".to_vec();
    payload.extend_from_slice(&tiff);

    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    segment.extend_from_slice(&payload);
    segment
}

/// Write a decodable 50×50 JPEG carrying an EXIF block right after SOI.
pub fn write_jpeg_with_exif(path: &Path, datetime_original: &str, description: Option<&str>) {
    let encoded = jpeg_bytes(50, 50);
    let mut output = encoded[..2].to_vec();
    output.extend_from_slice(&exif_app1(datetime_original, description));
    output.extend_from_slice(&encoded[2..]);
    std::fs::write(path, &output).unwrap();
}

/// Write an executable shell script standing in for the frame extractor.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Frame extractor that checks the fixed argument shape, then "extracts" a
/// frame by copying the input (a JPEG in disguise) to the output path.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-ffmpeg.sh",
        r#"[ "$#" -eq 9 ] || exit 2
[ "$1" = "-y" ] && [ "$2" = "-i" ] && [ "$4" = "-ss" ] && [ "$5" = "00:00:00.000" ] || exit 3
[ "$6" = "-vframes" ] && [ "$7" = "1" ] && [ "$8" = "-an" ] || exit 4
cp "$3" "$9""#,
    )
}

#[cfg(unix)]
pub fn failing_ffmpeg(dir: &Path) -> PathBuf {
    write_script(dir, "failing-ffmpeg.sh", "exit 1")
}

/// All regular files directly inside `dir`.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!("{}/*", dir.display());
    glob::glob(&pattern)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|p| p.is_file())
        .collect()
}
