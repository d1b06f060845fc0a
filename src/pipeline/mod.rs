pub mod aggregate;
pub mod baseline;
pub mod batch;
pub mod peaks;
pub mod segmenter;
pub mod timeline;

#[cfg(test)]
mod tests {
    use super::batch::{discover_inputs, run_batch, FileStatus};
    use crate::config::AnalysisConfig;
    use std::path::{Path, PathBuf};

    /// Two-cycle export: heat 40 → 140 °C, cool back, one peak per cycle at t = 6 min.
    /// Elapsed time restarts after the sentinel row.
    fn export_text(sign: f64, peak_table: bool) -> String {
        let mut out = String::from(
            "Instrument\tDSC\n\
             Sig1\tTime\tmin\n\
             Sig2\tTemperature\t°C\n\
             Sig3\tHeat Flow\tW/g\n\
             OrgMethod1: Equilibrate at 40.00 °C\n\
             OrgMethod2: Isothermal for 1.00 min\n\
             OrgMethod3: Ramp 10.00 °C/min to 140.00 °C\n\
             OrgMethod4: Mark end of cycle 1\n\
             OrgMethod5: Isothermal for 1.00 min\n\
             OrgMethod6: Ramp 10.00 °C/min to 40.00 °C\n\
             OrgMethod7: Mark end of cycle 2\n",
        );
        if peak_table {
            out.push_str("Peak Table\nCycle Onset Area Peak\n(#) (°C) (J/g) (°C)\n1 92.0 10.1 100.0\n");
        }
        out.push_str("StartOfData\n");
        for cycle in 0..2 {
            if cycle == 1 {
                out.push_str("-2\t-2\t-2\n");
            }
            for i in 0..=240 {
                let t = i as f64 * 0.05;
                let temp = if cycle == 0 { 40.0 + 10.0 * t } else { 140.0 - 10.0 * t };
                let x = (t - 6.0) / 0.4;
                let signal = sign * (0.5 * (-0.5 * x * x).exp() + 0.1 + 0.01 * t);
                out.push_str(&format!("{:.2}\t{:.2}\t{:.5}\n", t, temp, signal));
            }
        }
        out
    }

    fn write_utf16(path: &Path, text: &str) {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            left_margin: 0.5,
            right_margin: 0.5,
            ..Default::default()
        }
    }

    fn inputs(dir: &Path) -> Vec<PathBuf> {
        let a = dir.join("A.txt");
        let b = dir.join("B.txt");
        write_utf16(&a, &export_text(1.0, true));
        std::fs::write(&b, export_text(-1.0, false)).unwrap();
        vec![a, b]
    }

    #[test]
    fn test_end_to_end_batch() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let paths = inputs(input.path());

        let mut calls = Vec::new();
        let report = run_batch(&paths, &config(), out.path(), |done, total, _| calls.push((done, total)));

        assert_eq!(calls, vec![(1, 2), (2, 2)]);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.cycles, vec![1, 2]);
        assert!(report.write_errors.is_empty());

        for status in report.files.iter().map(|f| &f.status) {
            match status {
                FileStatus::Done {
                    segments,
                    empty_segments,
                    peaks,
                    uncorrected,
                } => {
                    assert_eq!(*segments, 2);
                    assert_eq!(*empty_segments, 0);
                    assert_eq!(*uncorrected, 0);
                    assert!(*peaks >= 2);
                }
                FileStatus::Failed(e) => panic!("unexpected failure: {}", e),
            }
        }

        for k in 1..=2 {
            let dir = out.path().join(format!("Cycle{}", k));
            assert!(dir.join("A.csv").exists());
            assert!(dir.join("B.csv").exists());
            assert!(dir.join("overlay.csv").exists());
            assert!(dir.join("peaks.csv").exists());
        }
        assert!(out.path().join("logs/A.json").exists());
        assert!(out.path().join("logs/B.txt").exists());

        let header = std::fs::read_to_string(out.path().join("Cycle1/A.csv")).unwrap();
        assert!(header.starts_with("Temperature/°C,Heat Flow/W/g,Heat Flow/W/g (corrected)"));

        // peak at t = 6 min sits at 100 °C on the heating ramp
        let peaks = std::fs::read_to_string(out.path().join("Cycle1/peaks.csv")).unwrap();
        let first: Vec<&str> = peaks.lines().nth(1).unwrap().split(',').collect();
        assert_eq!(first[0], "A");
        let t: f64 = first[2].parse().unwrap();
        assert!((t - 100.0).abs() < 0.6, "{}", t);

        let log = std::fs::read_to_string(out.path().join("logs/A.txt")).unwrap();
        assert!(log.contains("Peak cross-check"));
    }

    #[test]
    fn test_failing_file_does_not_abort_batch() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut paths = inputs(input.path());
        let broken = input.path().join("broken.txt");
        std::fs::write(&broken, "Sig1\tTime\tmin\nOrgMethod1: Mark end of cycle 1\n").unwrap();
        paths.insert(1, broken);
        paths.push(input.path().join("missing.txt"));

        let report = run_batch(&paths, &config(), out.path(), |_, _, _| {});
        assert_eq!(report.files.len(), 4);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);
        match &report.files[1].status {
            FileStatus::Failed(reason) => assert!(reason.contains("StartOfData")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(report.files[3].status, FileStatus::Failed(_)));
        assert!(report.summary().contains("2 file(s) processed, 2 failed"));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let input = tempfile::tempdir().unwrap();
        let paths = inputs(input.path());
        let seq = tempfile::tempdir().unwrap();
        let par = tempfile::tempdir().unwrap();

        run_batch(&paths, &config(), seq.path(), |_, _, _| {});
        let parallel = AnalysisConfig { jobs: 2, ..config() };
        let mut calls = Vec::new();
        run_batch(&paths, &parallel, par.path(), |done, _, _| calls.push(done));
        assert_eq!(calls, vec![1, 2]);

        for name in ["Cycle1/overlay.csv", "Cycle2/peaks.csv", "Cycle2/B.csv"] {
            let a = std::fs::read_to_string(seq.path().join(name)).unwrap();
            let b = std::fs::read_to_string(par.path().join(name)).unwrap();
            assert_eq!(a, b, "{}", name);
        }
    }

    #[test]
    fn test_disabled_stages_write_nothing() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let paths = inputs(input.path());
        let config = AnalysisConfig {
            save_segments: false,
            draw_overlay: false,
            correct_baseline: false,
            write_logs: false,
            ..config()
        };
        let report = run_batch(&paths, &config, out.path(), |_, _, _| {});
        assert_eq!(report.succeeded(), 2);
        assert!(report.written.is_empty());
        assert!(!out.path().join("Cycle1").exists());
        assert!(!out.path().join("logs").exists());
    }

    #[test]
    fn test_progress_reported_before_next_file() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let first = input.path().join("A.txt");
        std::fs::write(&first, export_text(1.0, false)).unwrap();
        // B only exists once A has been reported
        let second = input.path().join("B.txt");
        let paths = vec![first, second.clone()];

        let report = run_batch(&paths, &config(), out.path(), |done, _, _| {
            if done == 1 {
                std::fs::write(&second, export_text(1.0, false)).unwrap();
            }
        });
        assert_eq!(report.succeeded(), 2);
    }

    #[test]
    fn test_same_stem_keeps_separate_artifacts() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for dir in ["a", "b"] {
            let dir = input.path().join(dir);
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join("S.txt");
            std::fs::write(&path, export_text(1.0, false)).unwrap();
            paths.push(path);
        }

        let report = run_batch(&paths, &config(), out.path(), |_, _, _| {});
        assert_eq!(report.succeeded(), 2);
        assert!(report.write_errors.is_empty());

        let cycle1 = out.path().join("Cycle1");
        assert!(cycle1.join("S.csv").exists());
        assert!(cycle1.join("S_1.csv").exists());
        assert!(out.path().join("logs/S.json").exists());
        assert!(out.path().join("logs/S_1.json").exists());

        let mut written = report.written.clone();
        written.sort();
        written.dedup();
        assert_eq!(written.len(), report.written.len());

        let overlay = std::fs::read_to_string(cycle1.join("overlay.csv")).unwrap();
        assert!(overlay.lines().any(|l| l.starts_with("S,")));
        assert!(overlay.lines().any(|l| l.starts_with("S_1,")));
    }

    #[test]
    fn test_unwritable_artifact_is_reported() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let paths = inputs(input.path());
        std::fs::create_dir_all(out.path().join("Cycle1/A.csv")).unwrap();

        let report = run_batch(&paths, &config(), out.path(), |_, _, _| {});
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.write_errors.len(), 1);
        assert_eq!(report.write_errors[0].0, out.path().join("Cycle1/A.csv"));
        assert!(out.path().join("Cycle1/B.csv").exists());
        assert!(out.path().join("Cycle2/A.csv").exists());
        assert!(report.summary().contains("NOT WRITTEN"));
    }

    #[test]
    fn test_discover_inputs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "notes.csv"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let extra = PathBuf::from("single.txt");
        let found = discover_inputs(&[dir.path().to_path_buf(), extra.clone()]).unwrap();
        assert_eq!(found, vec![dir.path().join("a.txt"), dir.path().join("b.txt"), extra]);
    }
}
