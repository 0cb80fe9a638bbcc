//! Single-hidden-layer feedforward controller without biases.

use rand::Rng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use drivebots_core::{
    Activations, BreedingParams, Controller, LayerWeights, NetworkError, NetworkStructure,
};

/// Probability of inheriting a weight from the first parent.
const FIRST_PARENT_BIAS: f32 = 0.5;

/// Sensor readings in, `[throttle, brake, steer]` out.
///
/// Weights are row-major by destination unit: `input_layer[i * num_inputs + j]` connects input
/// `j` to hidden unit `i`, and `hidden_layer[i * num_hidden_nodes + j]` connects hidden unit `j`
/// to output `i`. Outputs are folded into `[0, 1]` by taking the absolute value and clamping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedForwardNetwork {
    structure: NetworkStructure,
    input_layer: Vec<f32>,
    hidden_layer: Vec<f32>,
}

impl FeedForwardNetwork {
    pub const KIND: &'static str = "feedforward";

    fn random_weight(rng: &mut dyn RngCore) -> f32 {
        rng.random::<f32>() * 2.0 - 1.0
    }

    fn random_layer(len: usize, rng: &mut dyn RngCore) -> Vec<f32> {
        (0..len).map(|_| Self::random_weight(rng)).collect()
    }

    /// Keep the first `len` weights and pad with fresh random ones.
    fn resize_layer(weights: &[f32], len: usize, rng: &mut dyn RngCore) -> Vec<f32> {
        let mut layer: Vec<f32> = weights.iter().copied().take(len).collect();
        while layer.len() < len {
            layer.push(Self::random_weight(rng));
        }
        layer
    }

    /// Per-weight uniform crossover. An index missing from one parent falls back to the other;
    /// missing from both, it is drawn fresh.
    fn cross_layer(
        first: &[f32],
        second: &[f32],
        len: usize,
        params: BreedingParams,
        rng: &mut dyn RngCore,
    ) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let r = rng.random::<f32>();
                let inherited = match (first.get(i), second.get(i)) {
                    (Some(&a), None) => a,
                    (Some(&a), Some(_)) if r < FIRST_PARENT_BIAS => a,
                    (_, Some(&b)) if r >= FIRST_PARENT_BIAS => b,
                    _ => Self::random_weight(rng),
                };
                if rng.random::<f32>() < params.mutation_chance {
                    let delta = (rng.random::<f32>() - 0.5) * params.mutation_amount;
                    (inherited + delta).clamp(-1.0, 1.0)
                } else {
                    inherited
                }
            })
            .collect()
    }
}

impl Controller for FeedForwardNetwork {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn structure(&self) -> NetworkStructure {
        self.structure
    }

    fn evaluate(&self, inputs: &[f32]) -> Result<Activations, NetworkError> {
        let NetworkStructure {
            num_inputs,
            num_hidden_nodes,
            num_outputs,
        } = self.structure;
        if inputs.len() != num_inputs {
            return Err(NetworkError::InputMismatch {
                expected: num_inputs,
                actual: inputs.len(),
            });
        }

        let hidden: Vec<f32> = (0..num_hidden_nodes)
            .map(|i| weighted_sum(row(&self.input_layer, i, num_inputs), inputs))
            .collect();
        let outputs: Vec<f32> = (0..num_outputs)
            .map(|i| {
                weighted_sum(row(&self.hidden_layer, i, num_hidden_nodes), &hidden)
                    .abs()
                    .clamp(0.0, 1.0)
            })
            .collect();

        Ok(Activations {
            inputs: inputs.to_vec(),
            hidden,
            outputs,
        })
    }

    fn weights(&self) -> LayerWeights<'_> {
        LayerWeights {
            input_layer: &self.input_layer,
            hidden_layer: &self.hidden_layer,
        }
    }

    fn random(structure: NetworkStructure, rng: &mut dyn RngCore) -> Self {
        Self {
            structure,
            input_layer: Self::random_layer(structure.input_weight_count(), rng),
            hidden_layer: Self::random_layer(structure.hidden_weight_count(), rng),
        }
    }

    fn reshaped(&self, structure: NetworkStructure, rng: &mut dyn RngCore) -> Self {
        if structure == self.structure {
            return self.clone();
        }
        Self {
            structure,
            input_layer: Self::resize_layer(&self.input_layer, structure.input_weight_count(), rng),
            hidden_layer: Self::resize_layer(
                &self.hidden_layer,
                structure.hidden_weight_count(),
                rng,
            ),
        }
    }

    fn from_parents(
        structure: NetworkStructure,
        [first, second]: [&Self; 2],
        params: BreedingParams,
        rng: &mut dyn RngCore,
    ) -> Self {
        let input_layer = Self::cross_layer(
            &first.input_layer,
            &second.input_layer,
            structure.input_weight_count(),
            params,
            rng,
        );
        let hidden_layer = Self::cross_layer(
            &first.hidden_layer,
            &second.hidden_layer,
            structure.hidden_weight_count(),
            params,
            rng,
        );
        Self {
            structure,
            input_layer,
            hidden_layer,
        }
    }

    fn from_weights(
        structure: NetworkStructure,
        input_layer: Vec<f32>,
        hidden_layer: Vec<f32>,
    ) -> Result<Self, NetworkError> {
        if input_layer.len() != structure.input_weight_count() {
            return Err(NetworkError::WeightCountMismatch {
                layer: "input",
                expected: structure.input_weight_count(),
                actual: input_layer.len(),
            });
        }
        if hidden_layer.len() != structure.hidden_weight_count() {
            return Err(NetworkError::WeightCountMismatch {
                layer: "hidden",
                expected: structure.hidden_weight_count(),
                actual: hidden_layer.len(),
            });
        }
        Ok(Self {
            structure,
            input_layer,
            hidden_layer,
        })
    }
}

/// Weights feeding destination unit `index`.
fn row(weights: &[f32], index: usize, width: usize) -> &[f32] {
    weights
        .get(index * width..(index + 1) * width)
        .unwrap_or_default()
}

fn weighted_sum(weights: &[f32], values: &[f32]) -> f32 {
    weights.iter().zip(values).map(|(w, v)| w * v).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivebots_core::SeedWeights;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn structure(inputs: usize, hidden: usize) -> NetworkStructure {
        NetworkStructure::new(inputs, hidden, 3)
    }

    fn in_unit_range(values: &[f32]) -> bool {
        values.iter().all(|v| (-1.0..=1.0).contains(v))
    }

    #[test]
    fn random_network_matches_structure() {
        let mut rng = SmallRng::seed_from_u64(0xDEADBEEF);
        let network = FeedForwardNetwork::random(structure(3, 10), &mut rng);
        let weights = network.weights();
        assert_eq!(weights.input_layer.len(), 30);
        assert_eq!(weights.hidden_layer.len(), 30);
        assert!(in_unit_range(weights.input_layer));
        assert!(in_unit_range(weights.hidden_layer));
        assert_eq!(network.kind(), "feedforward");
    }

    #[test]
    fn seeded_rng_reproduces_networks() {
        let a = FeedForwardNetwork::random(structure(5, 4), &mut SmallRng::seed_from_u64(9));
        let b = FeedForwardNetwork::random(structure(5, 4), &mut SmallRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn from_weights_validates_lengths() {
        let err = FeedForwardNetwork::from_weights(structure(2, 2), vec![0.0; 3], vec![0.0; 6])
            .unwrap_err();
        assert_eq!(
            err,
            NetworkError::WeightCountMismatch {
                layer: "input",
                expected: 4,
                actual: 3
            }
        );
        let err = FeedForwardNetwork::from_weights(structure(2, 2), vec![0.0; 4], vec![0.0; 5])
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::WeightCountMismatch {
                layer: "hidden",
                ..
            }
        ));
    }

    #[test]
    fn saved_network_reloads_as_seed_weights() {
        let mut rng = SmallRng::seed_from_u64(31);
        let network = FeedForwardNetwork::random(structure(3, 4), &mut rng);
        let saved = serde_json::to_value(&network).expect("serialize");
        assert_eq!(saved["structure"]["num_hidden_nodes"], 4);

        let restored: FeedForwardNetwork = serde_json::from_value(saved.clone()).expect("network");
        assert_eq!(restored, network);

        // The layer fields double as the config's seed weights.
        let seed: SeedWeights = serde_json::from_value(saved).expect("seed weights");
        assert_eq!(seed.validate(structure(3, 4)), Ok(()));
        let seeded =
            FeedForwardNetwork::from_weights(structure(3, 4), seed.input_layer, seed.hidden_layer)
                .expect("seeded");
        let inputs = [0.2, 0.9, 0.4];
        assert_eq!(
            seeded.evaluate(&inputs).expect("evaluate"),
            network.evaluate(&inputs).expect("evaluate")
        );
    }

    #[test]
    fn outputs_take_absolute_value_then_clamp() {
        let network = FeedForwardNetwork::from_weights(
            structure(2, 2),
            vec![1.0, 0.0, 0.0, 1.0],
            vec![1.0, 1.0, -1.0, -0.25, 4.0, 4.0],
        )
        .expect("network");
        let activations = network.evaluate(&[0.5, 0.25]).expect("evaluate");
        assert_eq!(activations.hidden, vec![0.5, 0.25]);
        assert!((activations.outputs[0] - 0.75).abs() < 1e-6);
        assert!((activations.outputs[1] - 0.5625).abs() < 1e-6);
        assert_eq!(activations.outputs[2], 1.0);
        assert_eq!(activations.inputs, vec![0.5, 0.25]);
    }

    #[test]
    fn opposite_sums_cancel_to_zero() {
        let network = FeedForwardNetwork::from_weights(
            structure(1, 2),
            vec![1.0, 1.0],
            vec![0.5, -0.5, 0.0, 0.0, 0.0, 0.0],
        )
        .expect("network");
        let activations = network.evaluate(&[0.8]).expect("evaluate");
        assert_eq!(activations.outputs, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn wrong_input_length_is_rejected() {
        let mut rng = SmallRng::seed_from_u64(1);
        let network = FeedForwardNetwork::random(structure(3, 4), &mut rng);
        assert_eq!(
            network.evaluate(&[0.0; 2]),
            Err(NetworkError::InputMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn reshape_preserves_prefix() {
        let mut rng = SmallRng::seed_from_u64(42);
        let original = FeedForwardNetwork::random(structure(5, 10), &mut rng);

        let shrunk = original.reshaped(structure(3, 6), &mut rng);
        assert_eq!(shrunk.weights().input_layer, &original.input_layer[..18]);
        assert_eq!(shrunk.weights().hidden_layer, &original.hidden_layer[..18]);

        let grown = original.reshaped(structure(7, 12), &mut rng);
        assert_eq!(grown.weights().input_layer.len(), 84);
        assert_eq!(grown.weights().hidden_layer.len(), 36);
        assert_eq!(&grown.weights().input_layer[..50], &original.input_layer[..]);
        assert_eq!(&grown.weights().hidden_layer[..30], &original.hidden_layer[..]);
        assert!(in_unit_range(grown.weights().input_layer));

        assert_eq!(original.reshaped(structure(5, 10), &mut rng), original);
    }

    #[test]
    fn crossover_without_mutation_copies_parent_weights() {
        let mut rng = SmallRng::seed_from_u64(7);
        let a = FeedForwardNetwork::random(structure(3, 10), &mut rng);
        let b = FeedForwardNetwork::random(structure(3, 10), &mut rng);
        let params = BreedingParams {
            mutation_chance: 0.0,
            mutation_amount: 0.5,
        };
        let child = FeedForwardNetwork::from_parents(structure(3, 10), [&a, &b], params, &mut rng);
        for (i, w) in child.input_layer.iter().enumerate() {
            assert!(*w == a.input_layer[i] || *w == b.input_layer[i]);
        }
        for (i, w) in child.hidden_layer.iter().enumerate() {
            assert!(*w == a.hidden_layer[i] || *w == b.hidden_layer[i]);
        }
        let from_a = child
            .input_layer
            .iter()
            .zip(&a.input_layer)
            .filter(|(c, p)| c == p)
            .count();
        assert!(from_a > 0 && from_a < child.input_layer.len());
    }

    #[test]
    fn heavy_mutation_stays_in_bounds() {
        let mut rng = SmallRng::seed_from_u64(99);
        let a = FeedForwardNetwork::random(structure(3, 10), &mut rng);
        let b = FeedForwardNetwork::random(structure(3, 10), &mut rng);
        let params = BreedingParams {
            mutation_chance: 1.0,
            mutation_amount: 10.0,
        };
        for _ in 0..20 {
            let child =
                FeedForwardNetwork::from_parents(structure(3, 10), [&a, &b], params, &mut rng);
            assert!(in_unit_range(&child.input_layer));
            assert!(in_unit_range(&child.hidden_layer));
        }
    }

    #[test]
    fn crossover_fills_target_structure_from_mismatched_parents() {
        let mut rng = SmallRng::seed_from_u64(2024);
        let small = FeedForwardNetwork::random(structure(3, 4), &mut rng);
        let large = FeedForwardNetwork::random(structure(5, 8), &mut rng);
        let target = structure(7, 6);
        let child = FeedForwardNetwork::from_parents(
            target,
            [&small, &large],
            BreedingParams::default(),
            &mut rng,
        );
        assert_eq!(child.structure(), target);
        assert_eq!(child.input_layer.len(), target.input_weight_count());
        assert_eq!(child.hidden_layer.len(), target.hidden_weight_count());
        assert!(in_unit_range(&child.input_layer));

        // Indices only the first parent covers are always inherited from it (before mutation).
        let params = BreedingParams {
            mutation_chance: 0.0,
            ..BreedingParams::default()
        };
        let child =
            FeedForwardNetwork::from_parents(structure(5, 8), [&large, &small], params, &mut rng);
        assert_eq!(&child.input_layer[12..], &large.input_layer[12..]);
    }
}
