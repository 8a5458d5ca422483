//! Deterministic diamonds-like data and a matching configuration for tests.

use std::{fmt::Write as _, fs, path::Path};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};

pub(crate) const CUTS: [&str; 5] = ["Fair", "Good", "Very Good", "Premium", "Ideal"];
pub(crate) const COLORS: [&str; 7] = ["J", "I", "H", "G", "F", "E", "D"];
pub(crate) const CLARITIES: [&str; 8] = ["I1", "SI2", "SI1", "VS2", "VS1", "VVS2", "VVS1", "IF"];

/// CSV text with an unnamed index column and `rows` distinct rows.
pub(crate) fn dataset_csv(rows: usize) -> String {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut out = String::from(",carat,cut,color,clarity,depth,table,price,x,y,z\n");
    for idx in 0..rows {
        let carat = (rng.gen_range(0.2..2.5_f64) * 100.0).round() / 100.0;
        let cut = rng.gen_range(0..CUTS.len());
        let color = rng.gen_range(0..COLORS.len());
        let clarity = rng.gen_range(0..CLARITIES.len());
        let depth = (rng.gen_range(58.0..64.0_f64) * 10.0).round() / 10.0;
        let table = rng.gen_range(53..62);
        let noise = rng.gen_range(-150.0..150.0_f64);
        let price = (400.0
            + 3800.0 * carat
            + 120.0 * cut as f64
            + 90.0 * color as f64
            + 110.0 * clarity as f64
            + noise)
            .round();
        let x = (carat.cbrt() * 6.4 * 100.0).round() / 100.0;
        let _ = writeln!(
            out,
            "{idx},{carat},{},{},{},{depth},{table},{price},{x},{},{}",
            CUTS[cut],
            COLORS[color],
            CLARITIES[clarity],
            ((x * 1.01) * 100.0).round() / 100.0,
            ((x * 0.62) * 100.0).round() / 100.0,
        );
    }
    out
}

/// Writes [`dataset_csv`] to `path`, creating parent folders.
pub(crate) fn write_dataset(path: &Path, rows: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, dataset_csv(rows)).unwrap();
}

/// Full configuration pointing at the given folders.
pub(crate) fn config_json(data_dir: impl AsRef<Path>, train_dir: impl AsRef<Path>) -> Value {
    json!({
        "paths": {
            "dataDir": data_dir.as_ref().display().to_string(),
            "trainDir": train_dir.as_ref().display().to_string()
        },
        "data": {
            "name": "diamonds",
            "source": {
                "getLocal": true,
                "localPath": "diamonds.csv",
                "url": "https://example.org/diamonds.csv"
            },
            "cleaning": {
                "dropDuplicates": true,
                "dropNa": true,
                "dropColumns": { "enabled": true, "columns": ["Unnamed: 0"] },
                "dropCustom": {
                    "enabled": true,
                    "columns": {
                        "carat": { "rangeOrEqual": true, "min": 0.0, "max": 10.0 }
                    }
                }
            },
            "exploration": {
                "scatter_matrix": { "enabled": true },
                "hist": { "enabled": true, "bins": 10 },
                "categorical": { "enabled": true, "columns": ["cut"] }
            },
            "processing": {
                "dropColumnsPostExploration": { "enabled": true, "columns": ["x", "y", "z"] },
                "getDummies": { "enabled": true, "columns": ["cut", "color"] },
                "orderCategorical": {
                    "enabled": true,
                    "columns": { "clarity": CLARITIES }
                },
                "trainTestSplit": { "target": "price", "testSize": 0.2, "randomState": 42 }
            }
        },
        "model": {
            "enabled": true,
            "type": "linear_regression",
            "params": {},
            "tuning": { "enabled": false },
            "transformation": { "enabled": true, "names": ["log"] },
            "evaluation": { "metrics": ["r2_score", "mean_absolute_error"] },
            "exploration": { "enabled": true },
            "save": { "enabled": true }
        },
        "deploy": {
            "enabled": true,
            "model_name": { "trainOnTheSpot": false, "epoch": "latest" },
            "similarity": {
                "categorical": ["cut", "color", "clarity"],
                "numeric": "carat",
                "defaultCount": 5
            }
        }
    })
}
