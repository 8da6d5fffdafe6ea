//! Host containers through a module and back.
//!
//! Every test registers inputs, runs an emulated module that copies its
//! input to an output virtual file, reads the output back and checks that
//! the session shut down with nothing left in the engine.

mod common;

use gmt_bridge::{Container, InputRef, MarshalWarning, ModuleArgs, OutputKind};
use gmt_bridge_test::{
    datetime, grid_with_nodata, mixed_table, rgb_image, rgba_image, sample_grid, sample_matrix, verify_sessions_closed,
    xy_table, TEST_SESSION_NAME,
};
use gmt_types::{Axis, Column, ColumnData, DType, Grid, Increments, Region, Registration, Table, TableSchema};
use pretty_assertions::assert_eq;

#[test]
fn test_table_round_trip_without_schema() {
    let engine = common::engine();
    let table = xy_table(6);

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let output = session.register_output(OutputKind::Table)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_table(None)
        })
        .unwrap();

    // Six records arrive in two segments and are concatenated in order.
    let expected = Table::default()
        .with_column("col0", vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
        .with_column("col1", vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0]);
    assert_eq!(echoed, expected);
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_minimal_xy_table_with_schema() {
    let engine = common::engine();
    let table = Table::default()
        .with_column("x", vec![1.0, 2.0, 3.0])
        .with_column("y", vec![4.0, 5.0, 6.0]);
    let schema = table.schema();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let output = session.register_output(OutputKind::Table)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_table(Some(&schema))
        })
        .unwrap();

    assert_eq!(echoed, table);
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_mixed_table_restored_from_schema() {
    let engine = common::engine();
    let table = mixed_table();
    let schema = table.schema();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let output = session.register_output(OutputKind::Table)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_table(Some(&schema))
        })
        .unwrap();

    assert_eq!(echoed.names(), vec!["lon", "depth", "count", "time", "label"]);
    assert_eq!(echoed.column("lon").unwrap().data, ColumnData::Float64(vec![120.5, 121.0, 121.5]));

    // A masked float comes back as NaN.
    let depth = echoed.column("depth").unwrap();
    match &depth.data {
        ColumnData::Float32(values) => {
            assert_eq!(values[0], 10.0);
            assert!(values[1].is_nan());
            assert_eq!(values[2], 30.0);
        }
        other => panic!("depth restored as {:?}", other.dtype()),
    }

    // A masked integer comes back masked, holding zero.
    let count = echoed.column("count").unwrap();
    assert_eq!(count.data, ColumnData::Int32(vec![3, 4, 0]));
    assert_eq!(count.validity, Some(vec![true, true, false]));

    assert_eq!(echoed.column("time").unwrap(), table.column("time").unwrap());
    assert_eq!(echoed.column("label").unwrap(), table.column("label").unwrap());
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_text_columns_share_trailing_text() {
    let engine = common::engine();
    let table = Table::default()
        .with_column("id", vec![1i16, 2])
        .with_column("station", vec!["ALB", "BRW"])
        .with_column("note", vec!["first light", "calm"]);
    let schema = TableSchema::new([("id", DType::Int16), ("station", DType::Text), ("note", DType::Text)]);

    let (plain, restored) = engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let first = session.register_output(OutputKind::Table)?;
            let second = session.register_output(OutputKind::Table)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(first.name()))?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(second.name()))?;
            Ok((first.read_table(None)?, second.read_table(Some(&schema))?))
        })
        .unwrap();

    assert_eq!(
        plain,
        Table::default()
            .with_column("col0", vec![1.0, 2.0])
            .with_column("text", vec!["ALB first light", "BRW calm"])
    );
    // The last text column takes the rest of the line.
    assert_eq!(restored, table);
}

#[test]
fn test_masked_text_survives_round_trip() {
    let engine = common::engine();
    let table = Table::new(vec![
        Column::new("x", vec![1.0, 2.0, 3.0]),
        Column::new("station", vec!["ALB", "BRW", "CGO"]).with_validity(vec![true, false, true]),
        Column::new("note", vec!["calm", "gusty winds", "rain"]).with_validity(vec![true, true, false]),
    ]);
    let schema = table.schema();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let output = session.register_output(OutputKind::Table)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_table(Some(&schema))
        })
        .unwrap();

    let station = echoed.column("station").unwrap();
    assert_eq!(station.validity, Some(vec![true, false, true]));
    assert_eq!(station.data, ColumnData::from(vec!["ALB", "", "CGO"]));
    let note = echoed.column("note").unwrap();
    assert_eq!(note.validity, Some(vec![true, true, false]));
    assert_eq!(note.data, ColumnData::from(vec!["calm", "gusty winds", ""]));
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_zero_row_table_round_trip() {
    let engine = common::engine();
    let table = Table::default()
        .with_column("x", Vec::<f64>::new())
        .with_column("y", Vec::<f64>::new());
    let schema = table.schema();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&table)?;
            let output = session.register_output(OutputKind::Table)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_table(Some(&schema))
        })
        .unwrap();

    assert_eq!(echoed, table);
    assert_eq!(echoed.n_rows(), 0);
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_datetime_keeps_fractional_seconds() {
    let engine = common::engine();
    let instant = datetime(2021, 6, 1, 8, 0, 0) + chrono::Duration::microseconds(250_500);
    let table = Table::new(vec![Column::new("t", vec![instant])]);
    let schema = table.schema();

    let echoed = engine
        .scoped(|session| {
            session.run_module("gmtconvert", &[InputRef::from(&table)], Some(OutputKind::Table), |inputs, output| {
                ModuleArgs::new().arg(inputs[0]).output(output.unwrap_or_default())
            })
        })
        .unwrap()
        .unwrap();

    let Container::Table(echoed) = echoed else {
        panic!("expected a table");
    };
    // Without a schema the time axis is seconds since the epoch.
    let seconds = echoed.column("col0").unwrap().data.value_f64(0).unwrap();
    assert_eq!(seconds, instant.and_utc().timestamp_micros() as f64 / 1e6);

    let restored = engine.scoped(|session| {
        session.with_input(&table, |input| {
            session.with_output(OutputKind::Table, |output| {
                session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
                output.read_table(Some(&schema))
            })
        })
    })
    .unwrap();
    assert_eq!(restored, table);
    verify_sessions_closed(TEST_SESSION_NAME, 2).unwrap();
}

#[test]
fn test_matrix_becomes_dataset() {
    let engine = common::engine();
    let matrix = sample_matrix();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&matrix)?;
            let output = session.register_output(OutputKind::Table)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_table(None)
        })
        .unwrap();

    assert_eq!(
        echoed,
        Table::default()
            .with_column("col0", vec![1.0, 3.0, 5.0])
            .with_column("col1", vec![2.0, 4.0, 6.0])
    );
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_integer_matrix_zero_copy() {
    let engine = common::engine();
    let matrix = gmt_types::Matrix::new(vec![1i32, -2, 3, -4], 2, 2).unwrap();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&matrix)?;
            let output = session.register_output(OutputKind::Unknown)?;
            session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_back()
        })
        .unwrap();

    let table = echoed.into_table().unwrap();
    assert_eq!(table.column("col1").unwrap().data, ColumnData::Float64(vec![-2.0, -4.0]));
}

#[test]
fn test_grid_round_trip() {
    let engine = common::engine();
    let grid = sample_grid();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&grid)?;
            assert!(input.warnings().is_empty());
            let output = session.register_output(OutputKind::Grid)?;
            session.dispatch("grdconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_grid()
        })
        .unwrap();

    assert_eq!(echoed, grid);
    assert_eq!(echoed.get(2, 3), Some(23.0));
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_grid_sentinel_survives_round_trip() {
    let engine = common::engine();
    let grid = grid_with_nodata();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&grid)?;
            let output = session.register_output(OutputKind::Grid)?;
            session.dispatch("grdconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_grid()
        })
        .unwrap();

    assert_eq!(echoed.nodata, Some(-9999.0));
    assert_eq!(echoed.get(1, 1), Some(-9999.0));
    assert_eq!(echoed.title, "bathymetry");
    assert_eq!(echoed, grid);
}

#[test]
fn test_grid_nan_reads_back_as_sentinel() {
    let engine = common::engine();
    let mut grid = grid_with_nodata();
    grid.data[0] = f32::NAN;

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&grid)?;
            let output = session.register_output(OutputKind::Grid)?;
            session.dispatch("grdconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_grid()
        })
        .unwrap();

    assert_eq!(echoed.get(0, 0), Some(-9999.0));
    assert_eq!(echoed.get(1, 1), Some(-9999.0));
}

#[test]
fn test_empty_grid_round_trip() {
    let engine = common::engine();
    let grid = Grid::empty(Region::new(0.0, 1.0, 0.0, 1.0), Increments::uniform(0.5), Registration::Pixel);

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&grid)?;
            let output = session.register_output(OutputKind::Grid)?;
            session.dispatch("grdconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_grid()
        })
        .unwrap();

    assert!(echoed.is_empty());
    assert_eq!(echoed.region, grid.region);
    assert_eq!(echoed.registration, Registration::Pixel);
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_irregular_coordinates_warn() {
    let engine = common::engine();
    let grid = sample_grid().with_coordinates(vec![0.0, 1.0, 2.5, 3.0], vec![2.0, 1.0, 0.0]);

    engine
        .scoped(|session| {
            let input = session.register_input(&grid)?;
            assert_eq!(input.warnings(), &[MarshalWarning::IrregularSpacing { axis: Axis::X }]);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_rgb_image_round_trip() {
    let engine = common::engine();
    let image = rgb_image();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&image)?;
            let output = session.register_output(OutputKind::Image)?;
            session.dispatch("grdmix", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_image()
        })
        .unwrap();

    assert_eq!(echoed, image);
    assert_eq!(echoed.pixel(1, 1), Some(vec![11, 111, 211]));
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_separate_alpha_becomes_fourth_band() {
    let engine = common::engine();
    let image = rgba_image();

    let echoed = engine
        .scoped(|session| {
            let input = session.register_input(&image)?;
            let output = session.register_output(OutputKind::Unknown)?;
            session.dispatch("grdmix", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
            output.read_back()
        })
        .unwrap();

    let echoed = echoed.into_image().unwrap();
    assert_eq!(echoed.n_bands, 4);
    assert!(echoed.has_alpha());
    assert_eq!(echoed.band(3), Some(&[255, 255, 0, 0][..]));
    assert_eq!(echoed, image);
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_unknown_output_discovers_grid() {
    let engine = common::engine();
    let grid = sample_grid();

    let echoed = engine
        .scoped(|session| {
            session.run_module("grdconvert", &[InputRef::from(&grid)], Some(OutputKind::Unknown), |inputs, output| {
                ModuleArgs::new().arg(inputs[0]).output(output.unwrap_or_default())
            })
        })
        .unwrap();

    assert!(matches!(echoed, Some(Container::Grid(ref g)) if *g == grid));
    verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
}

#[test]
fn test_concurrent_sessions_are_independent() {
    let engine = common::engine();

    let handles: Vec<_> = (1..=4)
        .map(|n| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                let table = xy_table(n * 3);
                let rows = engine
                    .scoped(|session| {
                        let input = session.register_input(&table)?;
                        let output = session.register_output(OutputKind::Table)?;
                        session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
                        Ok(output.read_table(None)?.n_rows())
                    })
                    .unwrap();
                verify_sessions_closed(TEST_SESSION_NAME, 1).unwrap();
                rows
            })
        })
        .collect();

    let rows: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(rows, vec![3, 6, 9, 12]);
    assert_eq!(engine.open_sessions(), 0);
}
