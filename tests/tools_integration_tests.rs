//! 工具层集成测试
//!
//! 测试CLI、运行配置、轨迹表读取与扫描、完整运行与结果文件写入。

use dut_result_analysis::analysis::{RunConfig, RunSummary};
use dut_result_analysis::error::{AnalysisError, ErrorCategory};
use dut_result_analysis::table::{JsonlTrackReader, TrackChunkSource};
use dut_result_analysis::tools::{self, AppConfig};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// 每个测试独立的临时目录
fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "dut_analysis_it_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn base_app(config_path: PathBuf, output_dir: PathBuf) -> AppConfig {
    AppConfig {
        config_path,
        alignment_path: None,
        output_dir,
        verbose: false,
        parallel_duts: None,
        use_prealignment: false,
        chunk_size: None,
    }
}

/// 两个DUT的轨迹表：每事件一条轨迹，DUT1位于 z = 10000
fn write_track_table(path: &Path, n_events: usize) {
    let mut lines = String::new();
    for event in 0..n_events {
        let x = -900.0 + (event % 37) as f64 * 50.0;
        let y = -900.0 + ((event / 37) % 37) as f64 * 50.0;
        let dx = ((event * 7) % 11) as f64 - 5.0;
        let dy = ((event * 3) % 13) as f64 - 6.0;
        let sx = 1e-4 * (((event * 13) % 21) as f64 - 10.0);
        let sy = 1e-4 * (((event * 17) % 19) as f64 - 9.0);
        let z1 = 10_000.0;
        let second = if event % 10 == 0 {
            serde_json::json!({"x": null, "y": null, "z": null})
        } else {
            serde_json::json!({"x": x + sx * z1 + dy, "y": y + sy * z1 + dx, "z": z1, "n_hits": 2})
        };
        let row = serde_json::json!({
            "event_number": event,
            "offset": [x, y, 0.0],
            "slope": [sx, sy, 1.0],
            "track_chi2": 2.0,
            "hits": [
                {"x": x + dx, "y": y + dy, "z": 0.0, "n_hits": 1},
                second
            ]
        });
        lines.push_str(&row.to_string());
        lines.push('\n');
    }
    std::fs::write(path, lines).unwrap();
}

fn write_alignment(path: &Path) {
    let alignment = serde_json::json!({
        "alignment": [
            {"translation_x": 0.0, "translation_y": 0.0, "translation_z": 0.0,
             "alpha": 0.0, "beta": 0.0, "gamma": 0.0},
            {"translation_x": 0.0, "translation_y": 0.0, "translation_z": 10000.0,
             "alpha": 0.0, "beta": 0.0, "gamma": 0.0}
        ],
        "prealignment": [
            {"offset_x": 0.0, "offset_y": 0.0, "z": 0.0},
            {"offset_x": 0.0, "offset_y": 0.0, "z": 10000.0}
        ]
    });
    std::fs::write(path, alignment.to_string()).unwrap();
}

/// 相对路径的运行配置（以配置文件所在目录为基准）
fn write_run_config(dir: &Path, extra: serde_json::Value) -> PathBuf {
    let mut config = serde_json::json!({
        "dut_names": ["Telescope 0", "DUT/1"],
        "tracks_dir": "tracks",
        "alignment_file": "alignment.json",
        "chunk_size": 250,
        "pixel_size": [50.0, 50.0],
        "n_pixels": [40, 40],
        "efficiency": {"cut_distance": 30.0},
        "purity": {"cut_distance": 30.0}
    });
    if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    let path = dir.join("run.json");
    std::fs::write(&path, config.to_string()).unwrap();
    path
}

fn setup_run(name: &str, extra: serde_json::Value) -> (PathBuf, AppConfig) {
    let dir = temp_dir(name);
    let tracks = dir.join("tracks");
    std::fs::create_dir_all(&tracks).unwrap();
    write_track_table(&tracks.join("tracks_dut_0.jsonl"), 1200);
    write_track_table(&tracks.join("tracks_dut_1.jsonl"), 1200);
    write_alignment(&dir.join("alignment.json"));
    let config_path = write_run_config(&dir, extra);
    let app = base_app(config_path, dir.join("results"));
    (dir, app)
}

// ============================================================================
// CLI
// ============================================================================

#[test]
fn test_cli_defaults_to_parallel_duts() {
    let config = tools::parse_args_from(["dut-analysis", "--config", "run.json"]).unwrap();
    assert_eq!(config.config_path, PathBuf::from("run.json"));
    assert_eq!(config.output_dir, PathBuf::from("results"));
    assert!(config.is_parallel());
    assert!(config.chunk_size.is_none());
}

#[test]
fn test_cli_serial_and_overrides() {
    let config = tools::parse_args_from([
        "dut-analysis",
        "-c",
        "run.json",
        "--serial",
        "--use-prealignment",
        "--chunk-size",
        "5000",
        "-a",
        "align.json",
    ])
    .unwrap();
    assert!(!config.is_parallel());
    assert!(config.use_prealignment);
    assert_eq!(config.chunk_size, Some(5000));
    assert_eq!(config.alignment_path, Some(PathBuf::from("align.json")));
}

#[test]
fn test_cli_rejects_out_of_range_parallelism() {
    assert!(tools::parse_args_from(["dut-analysis", "-c", "r.json", "--parallel-duts", "64"]).is_err());
    assert!(tools::parse_args_from(["dut-analysis"]).is_err());
}

// ============================================================================
// 运行配置
// ============================================================================

fn config_from(json: serde_json::Value) -> RunConfig {
    serde_json::from_value(json).unwrap()
}

#[test]
fn test_per_dut_list_length_mismatch_is_fatal() {
    let config = config_from(serde_json::json!({
        "dut_names": ["a", "b", "c"],
        "pixel_size": [[50.0, 50.0], [50.0, 50.0]],
        "n_pixels": [100, 100]
    }));
    let err = config.resolve().unwrap_err();
    assert!(matches!(err, AnalysisError::ConfigurationError(ref m) if m.contains("pixel_size")));
}

#[test]
fn test_single_values_broadcast() {
    let config = config_from(serde_json::json!({
        "dut_names": ["a", "b", "c"],
        "pixel_size": [250.0, 50.0],
        "n_pixels": [[80, 336], [80, 336], [40, 100]],
        "max_chi2": 15.0
    }));
    let settings = config.resolve().unwrap();
    assert_eq!(settings.len(), 3);
    assert!(settings.iter().all(|s| s.pixel_size == [250.0, 50.0]));
    assert!(settings.iter().all(|s| s.max_chi2 == Some(15.0)));
    assert_eq!(settings[2].n_pixels, [40, 100]);
    assert_eq!(settings[1].efficiency.bin_size, [250.0, 50.0]);
}

#[test]
fn test_bin_size_must_divide_sensor() {
    let config = config_from(serde_json::json!({
        "dut_names": ["a"],
        "pixel_size": [50.0, 50.0],
        "n_pixels": [100, 100],
        "efficiency": {"bin_size": [30.0, 50.0]}
    }));
    let err = config.resolve().unwrap_err();
    assert_eq!(ErrorCategory::from_analysis_error(&err), ErrorCategory::Configuration);
}

// ============================================================================
// 轨迹表
// ============================================================================

#[test]
fn test_jsonl_reader_keeps_events_together() {
    let rows = [
        r#"{"event_number": 1, "offset": [0, 0, 0], "slope": [0, 0, 1], "track_chi2": 1.0, "hits": [{"x": 1, "y": 2, "z": 0}]}"#,
        r#"{"event_number": 1, "offset": [5, 0, 0], "slope": [0, 0, 1], "track_chi2": 2.0, "hits": [{"x": null, "y": null, "z": null}]}"#,
        r#"{"event_number": 2, "offset": [0, 5, 0], "slope": [0, 0, 1], "track_chi2": null, "hits": []}"#,
        "",
        r#"{"event_number": 3, "offset": [0, 0, 0], "slope": [0, 0, 1], "track_chi2": 1.0}"#,
    ]
    .join("\n");
    let mut reader = JsonlTrackReader::new(Cursor::new(rows), 1).unwrap();

    let first = reader.next_chunk().unwrap().unwrap();
    assert_eq!(first.len(), 2, "同一事件的行必须位于同一数据块");
    assert!(first[1].hit_position(0).is_none());

    let second = reader.next_chunk().unwrap().unwrap();
    assert_eq!(second[0].event_number, 2);
    assert!(!second[0].has_valid_track());

    let third = reader.next_chunk().unwrap().unwrap();
    assert_eq!(third[0].event_number, 3);
    assert!(reader.next_chunk().unwrap().is_none());
    assert_eq!(reader.rows_read(), 4);
}

#[test]
fn test_jsonl_reader_rejects_malformed_line() {
    let rows = "{\"event_number\": 1, \"offset\": [0, 0, 0]}\n";
    let mut reader = JsonlTrackReader::new(Cursor::new(rows), 10).unwrap();
    let err = reader.next_chunk().unwrap_err();
    assert!(matches!(err, AnalysisError::FormatError(_)));
}

#[test]
fn test_scan_track_tables_orders_by_index() {
    let dir = temp_dir("scan");
    std::fs::create_dir_all(dir.join("run_1")).unwrap();
    std::fs::write(dir.join("tracks_dut_1.jsonl"), "").unwrap();
    std::fs::write(dir.join("run_1").join("tracks_dut_0.jsonl"), "").unwrap();
    std::fs::write(dir.join("notes.txt"), "").unwrap();

    let tables = tools::scan_track_tables(&dir, 2).unwrap();
    assert!(tables[0].ends_with("run_1/tracks_dut_0.jsonl"));
    assert!(tables[1].ends_with("tracks_dut_1.jsonl"));

    assert!(tools::scan_track_tables(&dir, 3).is_err());
    let _ = std::fs::remove_dir_all(&dir);
}

// ============================================================================
// 完整运行
// ============================================================================

#[test]
fn test_prepare_run_resolves_relative_paths() {
    let (dir, app) = setup_run("prepare", serde_json::json!({}));
    let ctx = tools::prepare_run(&app).unwrap();
    assert_eq!(ctx.n_duts(), 2);
    assert!(!ctx.alignment.is_prealignment());
    assert!(ctx.tables[1].ends_with("tracks/tracks_dut_1.jsonl"));
    assert_eq!(ctx.dut_label(1), "DUT1 (DUT/1)");

    let forced = AppConfig {
        use_prealignment: true,
        ..app
    };
    assert!(tools::prepare_run(&forced).unwrap().alignment.is_prealignment());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_prepare_run_rejects_mismatched_alignment() {
    let (dir, app) = setup_run(
        "mismatch",
        serde_json::json!({"dut_names": ["a", "b", "c"]}),
    );
    let err = tools::prepare_run(&app).unwrap_err();
    assert!(matches!(err, AnalysisError::ConfigurationError(_)));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_end_to_end_serial_and_parallel_agree() {
    let (dir, app) = setup_run("e2e", serde_json::json!({}));
    let ctx = tools::prepare_run(&app).unwrap();

    let serial: Vec<_> = (0..ctx.n_duts())
        .map(|dut| tools::process_and_save_dut(&ctx, dut).unwrap())
        .collect();
    let (parallel, stats) = tools::process_duts_parallel(&ctx, &app, 2).unwrap();
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 0);
    // 以JSON比较（拟合误差可能为NaN）
    for (a, b) in serial.iter().zip(&parallel) {
        assert_eq!(
            serde_json::to_string(a).unwrap(),
            serde_json::to_string(b.as_ref().unwrap()).unwrap()
        );
    }

    let dut1 = &serial[1];
    assert_eq!(dut1.rows_read, 1200);
    assert_eq!(dut1.efficiency.total, 1200);
    assert_eq!(dut1.efficiency.pass, 1080);
    assert_eq!(dut1.purity.pass, dut1.purity.total);

    let report_path = ctx.output_dir.join("dut_1_DUT_1.json");
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["dut_name"], "DUT/1");
    assert_eq!(written["alignment_model"], "alignment");
    assert!(written["histograms"].as_array().is_some_and(|h| !h.is_empty()));

    let summary = RunSummary::new(
        tools::timestamp(),
        "alignment",
        &ctx.config.dut_names,
        &parallel,
        tools::process_telescope_angles(&ctx),
    );
    let summary_path = tools::write_summary(&ctx.output_dir, &summary).unwrap();
    assert!(summary_path.ends_with("summary.json"));
    assert_eq!(summary.n_failed(), 0);
    assert!(summary.telescope_angle.is_some());
    assert_eq!(summary.efficiency.len(), 2);

    let leftovers: Vec<_> = std::fs::read_dir(&ctx.output_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "不应残留临时文件");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_failed_dut_does_not_write_report() {
    let (dir, app) = setup_run("failure", serde_json::json!({}));
    std::fs::write(
        dir.join("tracks").join("tracks_dut_1.jsonl"),
        "{not json}\n",
    )
    .unwrap();
    let ctx = tools::prepare_run(&app).unwrap();

    let (results, stats) = tools::process_duts_parallel(&ctx, &app, 2).unwrap();
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert_eq!(stats.failed, 1);
    assert!(!ctx.output_dir.join("dut_1_DUT_1.json").exists());

    let summary = RunSummary::new(tools::timestamp(), "alignment", &ctx.config.dut_names, &results, None);
    assert_eq!(summary.n_failed(), 1);
    assert_eq!(summary.failed[0].dut_index, 1);
    assert!(summary.efficiency[0].is_some());
    assert!(summary.efficiency[1].is_none());
    let _ = std::fs::remove_dir_all(&dir);
}
