use gonogo::codegen::{generate_stan, stan_data, stan_inits};
use gonogo::config::ExperimentConfig;
use gonogo::dataset::Dataset;
use gonogo::ddm::Simulator;
use gonogo::diagnostics::{format_stats, Draws};
use gonogo::experiment::{compile_model, simulate, summarize, write_dataset};

fn small_config(dir: &std::path::Path) -> ExperimentConfig {
    ExperimentConfig {
        n_subjects: 3,
        trials_per_level: 8,
        seed: Some(2024),
        simulator: Simulator {
            dt: 1e-3,
            ..Simulator::default()
        },
        output: dir.join("mydata.csv"),
        work_dir: dir.join("fit"),
        ..ExperimentConfig::default()
    }
}

#[test]
fn test_simulated_dataset_survives_csv() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = small_config(dir.path());

    let sim = simulate(&config).unwrap();
    write_dataset(&config, &sim.data).unwrap();

    let text = std::fs::read_to_string(&config.output).unwrap();
    assert_eq!(
        text.lines().next().unwrap(),
        ",rt,response,subj_idx,condition,session,cond_v"
    );
    let reloaded = Dataset::from_csv(&config.output).unwrap();
    assert_eq!(reloaded, sim.data);

    // 2 sessions x 2 conditions x 3 subjects x 8 trials
    assert_eq!(reloaded.len(), 96);
    let counts = reloaded.cell_counts();
    assert_eq!(counts.len(), 4 * 3);
    assert!(counts.values().all(|&n| n == 8));
}

#[test]
fn test_stan_program_matches_data_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = small_config(dir.path());
    let sim = simulate(&config).unwrap();
    let model = compile_model(&config, &sim.data).unwrap();

    let code = generate_stan(&model);
    let data = stan_data(&model, &sim.data);
    let data = data.as_object().unwrap();

    // Every data entry is declared in the data block and vice versa
    let data_block = code
        .split("data {")
        .nth(1)
        .and_then(|rest| rest.split("\n}\n").next())
        .unwrap();
    for key in data.keys() {
        assert!(
            data_block.contains(&format!(" {};", key)),
            "{} missing from data block",
            key
        );
    }
    let declared = data_block.lines().filter(|l| l.trim_end().ends_with(';')).count();
    assert_eq!(declared, data.len());

    // Session 1 z uses +lp, session 2 uses -lp
    let stim = data["stim_z"].as_array().unwrap();
    for (row, s) in sim.data.rows.iter().zip(stim) {
        let expected = if row.session == 1.0 { 1.0 } else { -1.0 };
        assert_eq!(s.as_f64().unwrap(), expected);
    }

    // Every sampled parameter has an initial value
    let inits = stan_inits(&model, &sim.data);
    for reg in &model.regressions {
        for name in ["Intercept", "Intercept_std", "Intercept_subj_raw"] {
            assert!(inits.get(reg.stan_name(name)).is_some());
        }
    }
}

#[test]
fn test_report_from_sampler_output() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = small_config(dir.path());
    let sim = simulate(&config).unwrap();
    let model = compile_model(&config, &sim.data).unwrap();

    let columns = model.reported_columns();
    let mut csv = String::from("# method = sample (Default)\n");
    csv.push_str("lp__,accept_stat__,divergent__,");
    csv.push_str(&columns.join(","));
    csv.push_str(",deviance\n");
    for (i, dev) in [400.0, 404.0, 402.0, 398.0, 401.0].iter().enumerate() {
        let mut values = vec!["-200".to_string(), "0.9".to_string(), "0".to_string()];
        for column in &columns {
            let value = if column.starts_with("a_Intercept") && !column.ends_with("_std") {
                1.8
            } else if column.starts_with("t_Intercept") && !column.ends_with("_std") {
                0.15
            } else if column.ends_with("_std") {
                0.1
            } else {
                0.01 * i as f64
            };
            values.push(value.to_string());
        }
        values.push(dev.to_string());
        csv.push_str(&values.join(","));
        csv.push('\n');
    }

    let draws = Draws::from_csv_str(&csv).unwrap();
    let report = summarize(&model, &sim.data, &draws).unwrap();

    let names: Vec<&str> = report.summaries.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"z_C(session)[T.2.0]"));
    assert!(names.contains(&"v_C(cond_v)[T.nogo2]"));
    assert!(names.contains(&"a_C(session)[T.2.0]"));
    assert!(names.contains(&"t_Intercept_subj.2"));
    assert!(!names.iter().any(|n| n.contains("raw")));

    let fit = report.fit.unwrap();
    assert!((fit.deviance - 401.0).abs() < 1e-9);
    assert!((fit.dic - (fit.deviance + fit.pd)).abs() < 1e-9);

    let text = format_stats(&report.summaries, report.fit.as_ref(), report.n_divergent);
    assert!(text.contains("DIC:"));
    assert!(text.contains("deviance: 401.000000"));
    assert!(text.contains("pD:"));
}
