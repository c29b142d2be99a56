use chessboard_tools::session::{CalibrationSession, CornerSink};
use chessboard_tools::pattern::PatternGeometry;
use chessboard_tools::util;
use clap::Parser;
use image::GrayImage;
use log::info;
use nalgebra::Vector2;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "chessboard-tools",
    about = "Calibrate a single camera from chessboard images.",
    long_about = "Estimates the camera matrix and radial-tangential distortion \
coefficients from a directory of chessboard photographs. Images where the \
board cannot be found are skipped; the calibration is written to the output \
directory as intrinsics.yaml and distortion.yaml, along with a report.json \
summary."
)]
struct Args {
    /// Directory containing the chessboard images.
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Directory receiving intrinsics.yaml, distortion.yaml and report.json.
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Number of internal corners along the board's width.
    #[arg(long)]
    board_cols: usize,

    /// Number of internal corners along the board's height.
    #[arg(long)]
    board_rows: usize,

    /// Side length of one chessboard square. Any unit works; the poses come
    /// out in the same unit. Usually millimeters.
    #[arg(short, long)]
    square_size: f64,

    /// Write a corner-overlay PNG per accepted image into the output
    /// directory for visual inspection.
    #[arg(long)]
    dump_corners: bool,
}

/// Corner sink writing detection overlays as PNG files.
struct OverlayWriter {
    output_dir: PathBuf,
}

impl CornerSink for OverlayWriter {
    fn show(&mut self, image_index: usize, image: &GrayImage, corners: &[Vector2<f64>]) {
        let mut canvas = image::RgbImage::from_fn(image.width(), image.height(), |x, y| {
            let v = image.get_pixel(x, y)[0];
            image::Rgb([v, v, v])
        });

        for corner in corners {
            let cx = corner.x.round() as i64;
            let cy = corner.y.round() as i64;
            for d in -3i64..=3 {
                for (px, py) in [(cx + d, cy), (cx, cy + d)] {
                    if px >= 0 && py >= 0 && px < canvas.width() as i64 && py < canvas.height() as i64
                    {
                        canvas.put_pixel(px as u32, py as u32, image::Rgb([255, 40, 40]));
                    }
                }
            }
        }

        let path = self.output_dir.join(format!("corners_{:03}.png", image_index));
        if let Err(err) = canvas.save(&path) {
            log::warn!("failed to write {}: {}", path.display(), err);
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let images = util::load_images(&args.input_dir)?;
    info!("loaded {} images from {}", images.len(), args.input_dir.display());

    let geometry = PatternGeometry::new(args.board_cols, args.board_rows, args.square_size);
    let session = CalibrationSession::new(images, geometry);

    let mut overlay = if args.dump_corners {
        util::ensure_output_dir(&args.output_dir)?;
        Some(OverlayWriter {
            output_dir: args.output_dir.clone(),
        })
    } else {
        None
    };
    let sink = overlay.as_mut().map(|w| w as &mut dyn CornerSink);

    let report = session.run(sink)?;

    // Persist only after refinement has converged.
    util::save_calibration(&report.model, &args.output_dir)?;
    fs::write(args.output_dir.join("report.json"), report.to_json()?)?;

    println!(
        "Used {} of {} images ({} rejected).",
        report.accepted.len(),
        report.accepted.len() + report.rejected.len(),
        report.rejected.len()
    );
    println!(
        "Camera matrix: fx {:.3} fy {:.3} cx {:.3} cy {:.3}",
        report.model.intrinsics.fx,
        report.model.intrinsics.fy,
        report.model.intrinsics.cx,
        report.model.intrinsics.cy
    );
    println!("Distortion: {:?}", report.model.distortions);
    println!(
        "RMS reprojection error {:.4} px ({})",
        report.rms_error,
        if report.rms_error < 0.2 {
            "very good"
        } else if report.rms_error < 0.5 {
            "good"
        } else if report.rms_error < 1.0 {
            "fine"
        } else {
            "poor - consider retaking the images"
        }
    );
    println!("Saved calibration matrices to {}", args.output_dir.display());

    Ok(())
}
