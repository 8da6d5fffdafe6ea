//! Host container fixtures
//!
//! Small, hand-checkable containers used across the bridge tests.

use chrono::{NaiveDate, NaiveDateTime};
use gmt_types::{Column, ColumnData, Grid, Image, Increments, Matrix, Region, Registration, Table};

/// Session name used by [`TEST_CONFIG_TOML`].
pub const TEST_SESSION_NAME: &str = "bridge-test";

/// Bridge configuration for tests: named sessions, GMT's default pad and a
/// short open timeout.
pub const TEST_CONFIG_TOML: &str = r#"
[library]
min_version = "6.4.0"

[session]
name = "bridge-test"
pad = 2
verbosity = "error"
max_concurrent_sessions = 4
open_timeout_ms = 2000

[marshal]
spacing_tolerance = 1e-6
"#;

/// Two double columns, `x = 0..n` and `y = 10 * x`.
pub fn xy_table(n: usize) -> Table {
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| v * 10.0).collect();
    Table::default().with_column("x", x).with_column("y", y)
}

pub fn datetime(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .expect("valid fixture date")
}

/// One column of every kind the bridge marshals differently:
///
/// | column  | type     | notes                              |
/// |---------|----------|------------------------------------|
/// | `lon`   | float64  |                                    |
/// | `depth` | float32  | row 1 masked                       |
/// | `count` | int32    | row 2 masked                       |
/// | `time`  | datetime |                                    |
/// | `label` | text     |                                    |
pub fn mixed_table() -> Table {
    Table::new(vec![
        Column::new("lon", vec![120.5f64, 121.0, 121.5]),
        Column::new("depth", vec![10.0f32, 20.0, 30.0]).with_validity(vec![true, false, true]),
        Column::new("count", vec![3i32, 4, 5]).with_validity(vec![true, true, false]),
        Column::new(
            "time",
            ColumnData::DateTime(vec![
                datetime(2023, 11, 14, 22, 13, 20),
                datetime(2023, 11, 15, 0, 0, 0),
                datetime(2024, 2, 29, 12, 30, 45),
            ]),
        ),
        Column::new(
            "label",
            vec!["north".to_string(), "mid".to_string(), "south".to_string()],
        ),
    ])
}

/// 3 rows by 2 columns of doubles.
pub fn sample_matrix() -> Matrix {
    Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).expect("valid fixture matrix")
}

/// A 3x4 gridline-registered grid over `0/3/0/2` with spacing 1, holding
/// `row * 10 + column`.
pub fn sample_grid() -> Grid {
    let data = (0..3)
        .flat_map(|row| (0..4).map(move |column| (row * 10 + column) as f32))
        .collect();
    Grid::new(
        data,
        3,
        4,
        Region::new(0.0, 3.0, 0.0, 2.0),
        Increments::uniform(1.0),
        Registration::Gridline,
    )
    .expect("valid fixture grid")
}

/// [`sample_grid`] with one sample replaced by a `-9999` sentinel.
pub fn grid_with_nodata() -> Grid {
    let mut grid = sample_grid().with_nodata(-9999.0).with_title("bathymetry");
    grid.data[5] = -9999.0;
    grid
}

/// A 2x2 pixel-registered RGB image; pixel `(r, c)` is
/// `(10 * r + c, 100 + 10 * r + c, 200 + 10 * r + c)`.
pub fn rgb_image() -> Image {
    let pixels: Vec<u8> = (0..2u8)
        .flat_map(|row| (0..2u8).flat_map(move |column| [0u8, 100, 200].map(|base| base + 10 * row + column)))
        .collect();
    Image::from_pixel_interleaved(&pixels, 3, 2, 2, Region::new(0.0, 2.0, 0.0, 2.0), Registration::Pixel)
        .expect("valid fixture image")
}

/// [`rgb_image`] plus an alpha band that is opaque in the first row.
pub fn rgba_image() -> Image {
    let mut image = rgb_image();
    image.data.extend_from_slice(&[255, 255, 0, 0]);
    image.n_bands = 4;
    image
}
