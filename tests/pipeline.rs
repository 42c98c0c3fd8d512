mod common;

use std::fs;
use std::fs::File;

use common::write_geotiff;
use treecrowns::georeference::read_detections_csv;
use treecrowns::roi::{read_geometries, write_geometries};
use treecrowns::storage::{annotation_key, raster_key, stem_of, LocalStore, ObjectStore};
use treecrowns::tiles::tile_windows;
use treecrowns::{
    georeference, georeference_user_boxes, load_raster_info, merge, rasterize, AreaNormalizer, Crs,
    DetectionTable, Geometry, PipelineConfig, Provenance,
};

// 0.5 m Web Mercator pixels near 78.15°E 17.7°N (UTM zone 44N).
const ORIGIN: (f64, f64) = (8_700_000.0, 2_000_000.0);

const DETECTIONS: &str = "\
xmin,ymin,xmax,ymax,score,label,x_offset,y_offset
10,10,14,14,0.92,Tree,0,0
30,30,34,34,0.10,Tree,0,0
0,0,20,20,0.80,Tree,360,0
2,4,6,8,0.55,Tree,360,360
";

#[test]
fn annotate_raster_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let tif = dir.path().join("Plot 7.tif");
    write_geotiff(&tif, 800, 800, 0.5, ORIGIN, 3857);

    let config = PipelineConfig::default();
    let info = load_raster_info(&tif, config.native_crs).unwrap();
    assert_eq!(info.frame.crs(), Crs::WEB_MERCATOR);
    assert_eq!(tile_windows(info.size, config.patch_size, config.overlap).unwrap().len(), 9);

    let (lon, lat) = info.frame.footprint(info.size).unwrap().reproject(Crs::WGS84).unwrap().center();
    let projected = Crs::utm_for(lon, lat);
    assert_eq!(projected.epsg(), 32644);
    let params = config.georeference_params(projected);

    // Low score and oversized crown are filtered, the other two survive.
    let raw = read_detections_csv(DETECTIONS.as_bytes()).unwrap();
    assert_eq!(raw.len(), 3);
    let model = georeference(&raw, &info.frame, info.size, &params).unwrap();
    assert_eq!(model.len(), 2);
    assert_eq!(model[0].bbox().to_array(), [10, 10, 14, 14]);
    assert_eq!(model[1].bbox().to_array(), [362, 364, 366, 368]);
    for det in &model {
        assert_eq!(det.geometry().crs(), Crs::WGS84);
        assert!(det.area_m2() > 3.0 && det.area_m2() < 4.0, "area {}", det.area_m2());
    }

    // A user box drawn over pixels (100,100)-(120,110), stored as WGS84 GeoJSON.
    let drawn = info
        .frame
        .rect_pixel_to_map(100.0, 100.0, 120.0, 110.0)
        .unwrap()
        .reproject(Crs::WGS84)
        .unwrap();
    let outside = Geometry::rectangle(0.0, 0.0, 0.001, 0.001, Crs::WGS84).unwrap();
    let mut geojson = Vec::new();
    write_geometries(&mut geojson, &[drawn, outside]).unwrap();
    let user_geoms = read_geometries(geojson.as_slice(), Crs::WGS84).unwrap();

    let boxes = rasterize(&user_geoms, &info.frame, info.size.width, info.size.height).unwrap();
    assert_eq!(boxes.len(), 2);
    let b = boxes[0];
    assert!(b.xmin().abs_diff(100) <= 1 && b.ymin().abs_diff(100) <= 1);
    assert!(b.xmax().abs_diff(120) <= 1 && b.ymax().abs_diff(110) <= 1);
    assert!(boxes[1].is_degenerate());

    let kept: Vec<_> = boxes.into_iter().filter(|b| !b.is_degenerate()).collect();
    let user = georeference_user_boxes(&kept, &info.frame, info.size, &params).unwrap();
    assert_eq!(user.len(), 1);
    assert_eq!(user[0].score(), None);

    let store = LocalStore::new(dir.path().join("bucket"));
    let stem = stem_of(&tif);
    assert_eq!(stem, "Plot_7");
    let image_ref = store.put(&tif, &raster_key(&stem)).unwrap();

    let table = merge(
        DetectionTable::new(model).unwrap(),
        DetectionTable::new(user).unwrap(),
        &image_ref,
    )
    .unwrap();
    assert_eq!(table.count(Provenance::Model), 2);
    assert_eq!(table.count(Provenance::User), 1);

    let csv_path = dir.path().join("Plot_7-annotations.csv");
    table.write_csv(File::create(&csv_path).unwrap()).unwrap();
    let csv_ref = store.put(&csv_path, &annotation_key(&stem)).unwrap();

    let text = fs::read_to_string(&csv_ref).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "xmin,ymin,xmax,ymax,label,score,geometry,area_m2,labelled_by,image_path");
    assert!(lines[1].contains(",0.92,") && lines[1].contains(",model,"));
    assert!(lines[3].contains(",Tree,,") && lines[3].contains(",user,"));
    assert!(lines.iter().skip(1).all(|l| l.ends_with(&image_ref)));
}

#[test]
fn normalize_small_roi_reaches_minimum_area() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = PipelineConfig::default();
    // Roughly 40 m × 40 m near Hyderabad.
    let roi = r#"{"type":"Polygon","coordinates":[[[78.4000,17.4000],[78.4004,17.4000],[78.4004,17.4004],[78.4000,17.4004],[78.4000,17.4000]]]}"#;
    let geoms = read_geometries(roi.as_bytes(), Crs::WGS84).unwrap();

    let normalizer = AreaNormalizer::new(config.normalize).unwrap();
    let out = normalizer
        .normalize_detailed(&geoms[0], config.min_area_m2, config.measurement_crs, config.output_crs)
        .unwrap();
    assert!(out.iterations >= 1);
    assert_eq!(out.geometry.crs(), Crs::WGS84);
    let measured = out.geometry.reproject(config.measurement_crs).unwrap().area_m2().unwrap();
    assert!(measured >= config.min_area_m2 * 0.999, "area {measured}");

    // Already large enough: nothing to do.
    let again = normalizer
        .normalize_detailed(&out.geometry, 1000.0, config.measurement_crs, config.output_crs)
        .unwrap();
    assert_eq!(again.iterations, 0);
}

#[test]
fn empty_detector_output_gives_empty_table() {
    let dir = tempfile::tempdir().unwrap();
    let tif = dir.path().join("empty.tif");
    write_geotiff(&tif, 64, 64, 0.5, ORIGIN, 3857);
    let info = load_raster_info(&tif, Crs::WEB_MERCATOR).unwrap();
    let params = PipelineConfig::default().georeference_params(Crs::from_epsg(32644));

    let raw = read_detections_csv("xmin,ymin,xmax,ymax,score\n".as_bytes()).unwrap();
    let model = georeference(&raw, &info.frame, info.size, &params).unwrap();
    assert!(model.is_empty());

    let table = merge(
        DetectionTable::new(model).unwrap(),
        DetectionTable::new(Vec::new()).unwrap(),
        "satellite-images/empty.tif",
    )
    .unwrap();
    assert!(table.is_empty());
}
