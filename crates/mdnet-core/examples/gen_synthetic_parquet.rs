//! Generate a synthetic processed dataset for trying the train pipeline.
//!
//! Usage: cargo run -p mdnet-core --example gen_synthetic_parquet -- data/synthetic [qm9|md17|ani1|custom] [count]
//!
//! Writes `<root>/processed/qm9.parquet` (12-column property rows), or an
//! energy/force set: `md17/ethanol.parquet`, `ani1.parquet`, `custom.parquet`.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use moldata::{DatasetKind, MoleculeReader, MoleculeRecord, MoleculeWriter};

/// U0 single-atom references (eV) for H, C, O.
fn atom_energy(z: u8) -> f32 {
    match z {
        1 => -13.613,
        6 => -1029.863,
        8 => -2042.611,
        _ => 0.0,
    }
}

/// A jittered water or methane molecule.
fn make_geometry(rng: &mut StdRng) -> (Vec<u8>, Vec<[f32; 3]>) {
    let water = rng.gen_bool(0.5);
    let mut jitter = |x: f32| x + rng.gen_range(-0.05..0.05);
    if water {
        let z = vec![8, 1, 1];
        let pos = vec![
            [0.0, 0.0, 0.0],
            [jitter(0.96), 0.0, 0.0],
            [jitter(-0.24), jitter(0.93), 0.0],
        ];
        (z, pos)
    } else {
        let z = vec![6, 1, 1, 1, 1];
        let d = 0.63;
        let pos = vec![
            [0.0, 0.0, 0.0],
            [jitter(d), jitter(d), jitter(d)],
            [jitter(-d), jitter(-d), jitter(d)],
            [jitter(-d), jitter(d), jitter(-d)],
            [jitter(d), jitter(-d), jitter(-d)],
        ];
        (z, pos)
    }
}

/// Harmonic bonds to atom 0 with rest length `r0`; returns energy and forces.
fn harmonic(pos: &[[f32; 3]], r0: f32, k: f32) -> (f32, Vec<[f32; 3]>) {
    let mut energy = 0.0;
    let mut forces = vec![[0.0f32; 3]; pos.len()];
    for i in 1..pos.len() {
        let d = [pos[i][0] - pos[0][0], pos[i][1] - pos[0][1], pos[i][2] - pos[0][2]];
        let r = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt().max(1e-6);
        energy += 0.5 * k * (r - r0).powi(2);
        let scale = -k * (r - r0) / r;
        for c in 0..3 {
            forces[i][c] += scale * d[c];
            forces[0][c] -= scale * d[c];
        }
    }
    (energy, forces)
}

fn make_qm9_record(rng: &mut StdRng) -> MoleculeRecord {
    let (z, pos) = make_geometry(rng);
    let (strain, _) = harmonic(&pos, 1.0, 5.0);
    let u0: f32 = z.iter().map(|&a| atom_energy(a)).sum::<f32>() - 2.5 + strain;

    let mut y: Vec<f32> = (0..12).map(|_| rng.gen_range(-1.0..1.0)).collect();
    y[1] = 5.0 + z.len() as f32;
    y[7] = u0;
    y[8] = u0 + 0.01;
    y[9] = u0 + 0.02;
    y[10] = u0 - 0.4;
    y[6] = 0.0;
    y[11] = 0.0;
    MoleculeRecord::new(z, pos).with_y(y)
}

fn make_custom_record(rng: &mut StdRng) -> MoleculeRecord {
    let (z, pos) = make_geometry(rng);
    let (energy, forces) = harmonic(&pos, 1.0, 5.0);
    MoleculeRecord::new(z, pos).with_y(vec![energy]).with_dy(forces)
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let root = PathBuf::from(args.next().unwrap_or_else(|| "data/synthetic".to_string()));
    let kind: DatasetKind = args.next().as_deref().unwrap_or("qm9").parse()?;
    let count: usize = args.next().as_deref().unwrap_or("256").parse()?;

    if kind == DatasetKind::Qm9sp {
        anyhow::bail!("qm9sp needs spectra; generate qm9 or custom");
    }

    let mut rng = StdRng::seed_from_u64(42);
    let records: Vec<MoleculeRecord> = (0..count)
        .map(|_| match kind {
            DatasetKind::Md17 | DatasetKind::Ani1 | DatasetKind::Custom => make_custom_record(&mut rng),
            DatasetKind::Qm9 | DatasetKind::Qm9sp => make_qm9_record(&mut rng),
        })
        .collect();

    let path = kind.source_path(&root, Some("ethanol"))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = MoleculeWriter::new(path.clone());
    writer.record_all(records);
    writer.finish()?;

    let summary = MoleculeReader::read_summary(&path)?;
    println!("Wrote synthetic {kind} dataset to: {}", path.display());
    if kind == DatasetKind::Md17 {
        println!("  Train with dataset_arg = \"ethanol\"");
    }
    println!("  Molecules:   {}", summary.total_records);
    println!("  Atoms:       {}", summary.total_atoms);
    println!("  With forces: {}", summary.with_forces);
    Ok(())
}
