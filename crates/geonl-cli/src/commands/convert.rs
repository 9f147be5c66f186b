use anyhow::{bail, Context, Result};
use clap::Args;
use geonl_lib::Coordinate;
use geonl_mcp::tools::ValidateCoordinatesTool;
use geonl_mcp::types::{CoordinateReport, ValidateCoordinatesInput};

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// RD x coordinate in metres.
    #[arg(long, requires = "y", conflicts_with_all = ["lat", "lon"], allow_negative_numbers = true)]
    pub x: Option<f64>,
    /// RD y coordinate in metres.
    #[arg(long, requires = "x", allow_negative_numbers = true)]
    pub y: Option<f64>,
    /// WGS84 latitude in degrees.
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,
    /// WGS84 longitude in degrees.
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,
    /// Print the conversion report as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &ConvertArgs) -> Result<()> {
    if args.x.is_none() && args.lat.is_none() {
        bail!("provide --x and --y (RD) or --lat and --lon (WGS84)");
    }
    let report = ValidateCoordinatesTool::execute(ValidateCoordinatesInput {
        x: args.x,
        y: args.y,
        lat: args.lat,
        lon: args.lon,
    })
    .context("conversion failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

fn render(report: &CoordinateReport) -> String {
    let mut out = format!(
        "{}\n{}\n",
        describe(&report.input),
        describe(&report.output)
    );
    if !report.validation.in_bounds {
        out.push_str("warning: outside the RD coverage area, accuracy not guaranteed\n");
    }
    out
}

fn describe(coordinate: &Coordinate) -> String {
    match coordinate {
        Coordinate::Rd(rd) => format!("RD (EPSG:28992)    x={:.3} y={:.3}", rd.x, rd.y),
        Coordinate::Wgs84(wgs) => {
            format!("WGS84 (EPSG:4326)  lat={:.8} lon={:.8}", wgs.lat, wgs.lon)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_both_systems() {
        let report = ValidateCoordinatesTool::execute(ValidateCoordinatesInput {
            x: Some(155_000.0),
            y: Some(463_000.0),
            lat: None,
            lon: None,
        })
        .unwrap();
        let text = render(&report);
        assert!(text.starts_with("RD (EPSG:28992)    x=155000.000 y=463000.000\n"));
        assert!(text.contains("lat=52.15517440 lon=5.38720621"));
        assert!(!text.contains("warning"));
    }
}
