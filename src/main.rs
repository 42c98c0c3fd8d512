//! Tree-crown annotation pipeline on GeoTIFF rasters.
//!
//! Usage:
//!   treecrowns normalize --roi plot.geojson --output plot-normalized.geojson
//!   treecrowns tiles --raster plot.tif --output tiles.csv
//!   treecrowns annotate --raster plot.tif --detections detections.csv --user-rois boxes.geojson
//!
//! Produces:
//!   <name>-annotations.csv: xmin, ymin, xmax, ymax, label, score, geometry, area_m2, labelled_by, image_path

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use treecrowns::georeference::read_detections_csv;
use treecrowns::roi::{read_geometries, write_geometries, DrawnBoxes};
use treecrowns::storage::{annotation_key, raster_key, sanitize_stem, stem_of, LocalStore, ObjectStore};
use treecrowns::tiles::{tile_windows, write_tile_windows};
use treecrowns::{
    georeference, georeference_user_boxes, load_raster_info, merge, rasterize, AreaNormalizer, Crs,
    DetectionTable, PipelineConfig, Provenance, RasterInfo,
};

// ==========================================================================
// CLI (clap)
// ==========================================================================

#[derive(Parser, Debug)]
#[command(
    name = "treecrowns",
    version,
    about = "Georeferenced tree-crown annotations for satellite rasters",
    after_help = "Settings come from --config (JSON), then from individual flags."
)]
struct Cli {
    /// JSON settings file; missing keys keep their defaults
    #[arg(long, global = true, value_name = "config.json")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Grow an ROI until it covers the minimum area and print the imagery request
    Normalize {
        /// ROI as GeoJSON (WGS84)
        #[arg(long, value_name = "roi.geojson")]
        roi: PathBuf,

        /// Minimum area (m²)
        #[arg(long)]
        min_area: Option<f64>,

        /// Projected EPSG code the area is measured in
        #[arg(long)]
        measurement_epsg: Option<u32>,

        /// EPSG code of the normalized geometry
        #[arg(long)]
        output_epsg: Option<u32>,

        /// Output GeoJSON (stdout when absent)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List the detector tile windows of a raster
    Tiles {
        #[arg(long, value_name = "image.tif")]
        raster: PathBuf,

        #[arg(long)]
        patch_size: Option<u32>,

        #[arg(long)]
        overlap: Option<f64>,

        /// CRS assumed when the GeoTIFF declares none
        #[arg(long)]
        native_epsg: Option<u32>,

        /// Output CSV (stdout when absent)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Georeference detections, add user boxes and export the annotation CSV
    Annotate {
        #[arg(long, value_name = "image.tif")]
        raster: PathBuf,

        /// Detector CSV: xmin,ymin,xmax,ymax,score[,x_offset,y_offset]
        #[arg(long, value_name = "detections.csv")]
        detections: PathBuf,

        /// User-drawn boxes as GeoJSON (WGS84); may be repeated
        #[arg(long, value_name = "boxes.geojson")]
        user_rois: Vec<PathBuf>,

        /// Name used for stored objects (defaults to the raster file stem)
        #[arg(long)]
        name: Option<String>,

        /// Local object store directory
        #[arg(long, default_value = "store")]
        store_dir: PathBuf,

        /// Report stored objects as <base>/<key>
        #[arg(long)]
        public_base: Option<String>,

        #[arg(long)]
        score_threshold: Option<f64>,

        /// Maximum crown area (m²)
        #[arg(long)]
        max_area: Option<f64>,

        /// CRS assumed when the GeoTIFF declares none
        #[arg(long)]
        native_epsg: Option<u32>,

        /// Projected EPSG code for the area column (default: UTM zone of the raster centre)
        #[arg(long)]
        projected_epsg: Option<u32>,

        /// Output CSV (default: <name>-annotations.csv)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("cannot create '{}'", p.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    })
}

// ==========================================================================
// normalize
// ==========================================================================

fn run_normalize(config: &PipelineConfig, roi: &Path, output: Option<&Path>) -> Result<()> {
    let file = File::open(roi).with_context(|| format!("cannot open '{}'", roi.display()))?;
    let geometries =
        read_geometries(BufReader::new(file), Crs::WGS84).with_context(|| format!("invalid ROI '{}'", roi.display()))?;
    if geometries.is_empty() {
        bail!("'{}' contains no polygon", roi.display());
    }

    let normalizer = AreaNormalizer::new(config.normalize)?;
    eprintln!(
        "1. Normalizing {} region(s) to ≥ {:.0} m² in {}",
        geometries.len(),
        config.min_area_m2,
        config.measurement_crs
    );

    let mut normalized = Vec::with_capacity(geometries.len());
    for (i, g) in geometries.iter().enumerate() {
        let n = normalizer
            .normalize_detailed(g, config.min_area_m2, config.measurement_crs, config.output_crs)
            .with_context(|| format!("region {i} of '{}'", roi.display()))?;
        eprintln!("   region {i}: {:.1} m² after {} buffer pass(es)", n.area_m2, n.iterations);

        let wgs84 = n.geometry.reproject(Crs::WGS84)?;
        let b = wgs84.bounds();
        eprintln!(
            "   imagery request: bbox=({:.6}, {:.6}, {:.6}, {:.6})  zoom={}",
            b.min().x,
            b.min().y,
            b.max().x,
            b.max().y,
            config.zoom
        );
        normalized.push(n.geometry);
    }

    write_geometries(open_output(output)?, &normalized)?;
    if let Some(p) = output {
        eprintln!("2. Export → '{}'", p.display());
    }
    Ok(())
}

// ==========================================================================
// tiles
// ==========================================================================

fn load_raster(path: &Path, config: &PipelineConfig) -> Result<RasterInfo> {
    let info = load_raster_info(path, config.native_crs)
        .with_context(|| format!("cannot read GeoTIFF '{}'", path.display()))?;
    eprintln!(
        "   {} × {} pixels, {}",
        info.size.width,
        info.size.height,
        info.frame.crs()
    );
    Ok(info)
}

fn run_tiles(config: &PipelineConfig, raster: &Path, output: Option<&Path>) -> Result<()> {
    eprintln!("1. Loading '{}'...", raster.display());
    let info = load_raster(raster, config)?;
    let windows = tile_windows(info.size, config.patch_size, config.overlap)?;
    eprintln!(
        "2. {} tile(s) of {} px, overlap {:.2}",
        windows.len(),
        config.patch_size,
        config.overlap
    );
    write_tile_windows(open_output(output)?, &windows)?;
    Ok(())
}

// ==========================================================================
// annotate
// ==========================================================================

struct AnnotateJob<'a> {
    raster: &'a Path,
    detections: &'a Path,
    user_rois: &'a [PathBuf],
    name: Option<&'a str>,
    store: LocalStore,
    output: Option<&'a Path>,
}

fn run_annotate(config: &PipelineConfig, job: AnnotateJob<'_>) -> Result<()> {
    let stem = match job.name {
        Some(n) => sanitize_stem(n),
        None => stem_of(job.raster),
    };
    if stem.is_empty() {
        bail!("cannot derive an object name from '{}'", job.raster.display());
    }

    println!("══════════════════════════════════════════════════════════");
    println!("  treecrowns — annotations for '{stem}'");
    println!("══════════════════════════════════════════════════════════\n");

    println!("1. Loading '{}'...", job.raster.display());
    let RasterInfo { size, frame } = load_raster(job.raster, config)?;
    let projected_crs = match config.projected_crs {
        Some(crs) => crs,
        None => {
            let (lon, lat) = frame.footprint(size)?.reproject(Crs::WGS84)?.center();
            Crs::utm_for(lon, lat)
        }
    };
    let params = config.georeference_params(projected_crs);
    println!(
        "   display={}  area in {}  score ≥ {:.2}  area ≤ {:.0} m²",
        params.display_crs, params.projected_crs, params.score_threshold, params.max_area_m2
    );

    println!("2. Georeferencing '{}'...", job.detections.display());
    let file = File::open(job.detections)
        .with_context(|| format!("cannot open '{}'", job.detections.display()))?;
    let raw = read_detections_csv(BufReader::new(file))
        .with_context(|| format!("invalid detector CSV '{}'", job.detections.display()))?;
    let model_rows = georeference(&raw, &frame, size, &params)?;
    println!("   ✓ {} model detection(s) kept", model_rows.len());

    println!("3. User boxes...");
    let mut drawn = DrawnBoxes::new();
    for path in job.user_rois {
        let file = File::open(path).with_context(|| format!("cannot open '{}'", path.display()))?;
        let geoms = read_geometries(BufReader::new(file), Crs::WGS84)
            .with_context(|| format!("invalid user boxes '{}'", path.display()))?;
        drawn.extend(geoms);
    }
    let boxes = rasterize(drawn.geometries(), &frame, size.width, size.height)?;
    let total = boxes.len();
    let boxes: Vec<_> = boxes.into_iter().filter(|b| !b.is_degenerate()).collect();
    if boxes.len() < total {
        warn!(
            "dropped {} user box(es) with no area inside the raster",
            total - boxes.len()
        );
    }
    let user_rows = georeference_user_boxes(&boxes, &frame, size, &params)?;
    println!("   ✓ {} user box(es)", user_rows.len());

    println!("4. Storing raster...");
    let image_ref = job
        .store
        .put(job.raster, &raster_key(&stem))
        .with_context(|| format!("upload of '{}' failed", job.raster.display()))?;
    println!("   → {image_ref}");

    let table = merge(DetectionTable::new(model_rows)?, DetectionTable::new(user_rows)?, &image_ref)?;

    let output = job
        .output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{stem}-annotations.csv")));
    println!("5. Export → '{}'", output.display());
    let file = File::create(&output).with_context(|| format!("cannot create '{}'", output.display()))?;
    table.write_csv(BufWriter::new(file))?;
    println!("   {} lines written.", table.len());

    let csv_ref = job
        .store
        .put(&output, &annotation_key(&stem))
        .with_context(|| format!("upload of '{}' failed", output.display()))?;
    info!("annotation CSV stored as {csv_ref}");

    println!("\n══════════════════════════════════════════════════════════");
    println!(
        "  ✓ Done — {} model + {} user annotation(s) → {csv_ref}",
        table.count(Provenance::Model),
        table.count(Provenance::User)
    );
    println!("══════════════════════════════════════════════════════════");
    Ok(())
}

// ==========================================================================
// Main
// ==========================================================================

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(p) => PipelineConfig::load(p).with_context(|| format!("invalid config '{}'", p.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Normalize {
            roi,
            min_area,
            measurement_epsg,
            output_epsg,
            output,
        } => {
            if let Some(v) = min_area {
                config.min_area_m2 = v;
            }
            if let Some(code) = measurement_epsg {
                config.measurement_crs = Crs::from_epsg(code);
            }
            if let Some(code) = output_epsg {
                config.output_crs = Crs::from_epsg(code);
            }
            config.validate()?;
            run_normalize(&config, &roi, output.as_deref())
        }
        Command::Tiles {
            raster,
            patch_size,
            overlap,
            native_epsg,
            output,
        } => {
            if let Some(v) = patch_size {
                config.patch_size = v;
            }
            if let Some(v) = overlap {
                config.overlap = v;
            }
            if let Some(code) = native_epsg {
                config.native_crs = Crs::from_epsg(code);
            }
            config.validate()?;
            run_tiles(&config, &raster, output.as_deref())
        }
        Command::Annotate {
            raster,
            detections,
            user_rois,
            name,
            store_dir,
            public_base,
            score_threshold,
            max_area,
            native_epsg,
            projected_epsg,
            output,
        } => {
            if let Some(v) = score_threshold {
                config.score_threshold = v;
            }
            if let Some(v) = max_area {
                config.max_area_m2 = v;
            }
            if let Some(code) = native_epsg {
                config.native_crs = Crs::from_epsg(code);
            }
            if let Some(code) = projected_epsg {
                config.projected_crs = Some(Crs::from_epsg(code));
            }
            config.validate()?;

            let mut store = LocalStore::new(store_dir);
            if let Some(base) = public_base {
                store = store.with_public_base(base);
            }
            run_annotate(
                &config,
                AnnotateJob {
                    raster: &raster,
                    detections: &detections,
                    user_rois: &user_rois,
                    name: name.as_deref(),
                    store,
                    output: output.as_deref(),
                },
            )
        }
    }
}
