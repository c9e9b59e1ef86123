//! Interface to the external generative model owning the latent space.
//!
//! The optimizer never looks inside the model: it only needs to decode latent
//! vectors into molecule encodings and, for fresh runs, to draw latent
//! samples from the model prior. Model internals and training are out of
//! scope and live behind the process boundary.

use crate::errors::{OptError, Result};
use ndarray::{Array, Array2, ArrayView2};
use ndarray_npy::WriteNpyExt;
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256Plus;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A generative model over molecules with a continuous latent space.
///
/// `decode` must be deterministic given the latent vector; models with
/// internal sampling must fix their own seed so repeated runs reproduce.
pub trait GenerativeModel: Sync {
    /// Decoded sequence encoding, before molecule-string conversion
    type Sequence;

    /// Dimension of the latent space
    fn latent_dim(&self) -> usize;

    /// Decode each row of `z` into a sequence encoding.
    fn decode(&self, z: &ArrayView2<f64>) -> Result<Vec<Self::Sequence>>;

    /// Convert a sequence encoding into a molecule string, `None` when the
    /// sequence is not a valid molecule.
    fn sequence_to_string(&self, sequence: &Self::Sequence) -> Option<String>;

    /// Draw `n` latent vectors from the model prior.
    fn sample_prior(&self, n: usize, rng: &mut Xoshiro256Plus) -> Array2<f64>;

    /// Encode molecules back into latent vectors. Only needed for seeded
    /// runs; unsupported by default.
    fn encode(&self, _molecules: &[String]) -> Result<Array2<f64>> {
        Err(OptError::ConfigurationError(
            "This generative model does not support encoding".to_string(),
        ))
    }
}

/// Decoder behind a process boundary: the command receives the latent matrix
/// as an npy blob on stdin and answers with one line per row on stdout, an
/// empty line marking an undecodable latent vector. The latent prior is
/// standard normal, the common choice for VAE-style generative models.
#[derive(Clone, Debug)]
pub struct CommandDecoder {
    program: PathBuf,
    args: Vec<String>,
    latent_dim: usize,
}

impl CommandDecoder {
    /// Wrap an external decoder executable for a `latent_dim`-dimensional model.
    pub fn new(program: impl Into<PathBuf>, args: &[String], latent_dim: usize) -> Self {
        CommandDecoder {
            program: program.into(),
            args: args.to_vec(),
            latent_dim,
        }
    }
}

impl GenerativeModel for CommandDecoder {
    type Sequence = String;

    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn decode(&self, z: &ArrayView2<f64>) -> Result<Vec<String>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        {
            let stdin = child.stdin.take().ok_or_else(|| {
                OptError::InvalidValueError("Decoder process stdin unavailable".to_string())
            })?;
            z.write_npy(stdin)?;
        }

        let mut stdout = String::new();
        child
            .stdout
            .take()
            .ok_or_else(|| {
                OptError::InvalidValueError("Decoder process stdout unavailable".to_string())
            })?
            .read_to_string(&mut stdout)?;
        let status = child.wait()?;
        if !status.success() {
            return Err(OptError::InvalidValueError(format!(
                "Decoder command {} exited with {status}",
                self.program.display()
            )));
        }

        let sequences = stdout.lines().map(|l| l.trim().to_string()).collect::<Vec<_>>();
        if sequences.len() != z.nrows() {
            return Err(OptError::InvalidValueError(format!(
                "Decoder answered {} sequences for {} latent vectors",
                sequences.len(),
                z.nrows()
            )));
        }
        Ok(sequences)
    }

    fn sequence_to_string(&self, sequence: &String) -> Option<String> {
        if sequence.is_empty() {
            None
        } else {
            Some(sequence.clone())
        }
    }

    fn sample_prior(&self, n: usize, rng: &mut Xoshiro256Plus) -> Array2<f64> {
        Array::random_using((n, self.latent_dim), StandardNormal, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn test_command_decoder_roundtrip() {
        let decoder = CommandDecoder::new(
            "sh",
            &[
                "-c".to_string(),
                r#"cat > /dev/null; printf 'CCO\n\nc1ccccc1\n'"#.to_string(),
            ],
            2,
        );
        let z = array![[0., 0.], [1., 1.], [2., 2.]];
        let sequences = decoder.decode(&z.view()).unwrap();
        assert_eq!(sequences, vec!["CCO", "", "c1ccccc1"]);
        assert_eq!(decoder.sequence_to_string(&sequences[0]).as_deref(), Some("CCO"));
        assert_eq!(decoder.sequence_to_string(&sequences[1]), None);
    }

    #[test]
    fn test_command_decoder_length_mismatch() {
        let decoder = CommandDecoder::new(
            "sh",
            &["-c".to_string(), "cat > /dev/null; printf 'CCO\n'".to_string()],
            2,
        );
        let z = array![[0., 0.], [1., 1.]];
        assert!(decoder.decode(&z.view()).is_err());
    }

    #[test]
    fn test_command_decoder_failure_status() {
        let decoder = CommandDecoder::new(
            "sh",
            &["-c".to_string(), "cat > /dev/null; exit 3".to_string()],
            2,
        );
        let z = array![[0., 0.]];
        assert!(decoder.decode(&z.view()).is_err());
    }

    #[test]
    fn test_sample_prior_is_seeded() {
        let decoder = CommandDecoder::new("true", &[], 4);
        let z1 = decoder.sample_prior(5, &mut Xoshiro256Plus::seed_from_u64(42));
        let z2 = decoder.sample_prior(5, &mut Xoshiro256Plus::seed_from_u64(42));
        assert_eq!(z1.shape(), &[5, 4]);
        assert_eq!(z1, z2);
    }
}
