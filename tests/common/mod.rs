use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// Blank 8-bit GeoTIFF, north-up, `pixel` metres square, upper-left corner at
/// `origin`, declaring `epsg` as its projected CRS.
pub fn write_geotiff(path: &Path, width: u32, height: u32, pixel: f64, origin: (f64, f64), epsg: u16) {
    let file = BufWriter::new(File::create(path).unwrap());
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder.new_image::<colortype::Gray8>(width, height).unwrap();
    let scale = [pixel, pixel, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, origin.0, origin.1, 0.0];
    let keys: [u16; 8] = [1, 1, 0, 1, 3072, 0, 1, epsg];
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..]).unwrap();
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..]).unwrap();
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &keys[..]).unwrap();
    image.write_data(&vec![0u8; (width * height) as usize]).unwrap();
}
