use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use spectra::{arange, linspace, mean, normal, stddev, uniform, ArrayError, DataType};

#[test]
fn arange_produces_float32_steps() -> Result<()> {
    let values = arange(0.0, 5.0, 1.0)?;
    assert_eq!(values.dtype(), DataType::FLOAT32);
    assert_eq!(values.to_vec::<f32>()?, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(arange(0.0, 1.0, 0.25)?.numel(), 4);
    assert!(matches!(arange(0.0, 1.0, 0.0), Err(ArrayError::Value(_))));
    Ok(())
}

#[test]
fn linspace_edge_cases() -> Result<()> {
    let values = linspace(0.0, 1.0, 3)?;
    assert_eq!(values.to_vec::<f32>()?, vec![0.0, 0.5, 1.0]);
    assert!(matches!(linspace(0.0, 1.0, 0), Err(ArrayError::Value(_))));
    let descending = linspace(10.0, 0.0, 6)?.to_vec::<f32>()?;
    assert_eq!(descending.first(), Some(&10.0));
    assert_eq!(descending.last(), Some(&0.0));
    Ok(())
}

#[test]
fn seeded_generators_are_reproducible() -> Result<()> {
    let a = uniform(&[16], 0.0, 1.0, &mut StdRng::seed_from_u64(5))?;
    let b = uniform(&[16], 0.0, 1.0, &mut StdRng::seed_from_u64(5))?;
    assert_eq!(a.to_vec::<f32>()?, b.to_vec::<f32>()?);
    Ok(())
}

#[test]
fn normal_samples_match_their_moments() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(1234);
    let samples = normal(&[100, 100], 3.0, 0.5, &mut rng)?;
    let m = mean(&samples, &[])?.get::<f32>(&[])?;
    let s = stddev(&samples, &[])?.get::<f32>(&[])?;
    assert!((m - 3.0).abs() < 0.05, "mean {m}");
    assert!((s - 0.5).abs() < 0.05, "stddev {s}");
    assert!(matches!(
        normal(&[2], 0.0, -1.0, &mut rng),
        Err(ArrayError::Value(_))
    ));
    Ok(())
}
