//! Trainable classifier head: a four-stage linear funnel ending in
//! log-probabilities over the target classes.

use std::collections::BTreeMap;

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    tensor::{activation::log_softmax, backend::Backend, Tensor, TensorData},
};
use serde::{Deserialize, Serialize};
use transfer_core::{Error, Mode};

/// Number of linear stages in the head
pub const NUM_STAGES: usize = 4;

/// Configuration for the classifier head
#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    /// Width of the backbone feature vector
    pub input_features: usize,
    /// Hidden stage widths, first to last
    pub hidden: [usize; 3],
    /// Number of target classes
    pub num_classes: usize,
    /// Dropout probability after each hidden stage
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl ClassifierHeadConfig {
    /// Every width, input to output.
    pub fn widths(&self) -> [usize; NUM_STAGES + 1] {
        [
            self.input_features,
            self.hidden[0],
            self.hidden[1],
            self.hidden[2],
            self.num_classes,
        ]
    }

    /// Widths must be positive and never grow from input to output.
    pub fn check(&self) -> transfer_core::Result<()> {
        let widths = self.widths();
        if widths.contains(&0) {
            return Err(Error::Config(format!(
                "classifier widths must be positive, got {widths:?}"
            )));
        }
        if widths.windows(2).any(|pair| pair[1] > pair[0]) {
            return Err(Error::Config(format!(
                "classifier widths must narrow towards the {} classes, got {widths:?}",
                self.num_classes
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Initialize a head with fresh weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> transfer_core::Result<ClassifierHead<B>> {
        self.check()?;
        let widths = self.widths();
        let stages = widths
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init(device))
            .collect();

        Ok(ClassifierHead {
            stages,
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        })
    }

    /// Recover the configuration from a persisted topology.
    pub fn from_topology(topology: &[StageSpec]) -> transfer_core::Result<Self> {
        let linear: Vec<(usize, usize)> = topology
            .iter()
            .filter_map(|stage| match stage {
                StageSpec::Linear {
                    in_features,
                    out_features,
                    ..
                } => Some((*in_features, *out_features)),
                _ => None,
            })
            .collect();
        if linear.len() != NUM_STAGES || linear.windows(2).any(|w| w[0].1 != w[1].0) {
            return Err(Error::Model(format!(
                "expected {NUM_STAGES} chained linear stages, got {linear:?}"
            )));
        }
        let dropout = topology
            .iter()
            .find_map(|stage| match stage {
                StageSpec::Dropout { prob, .. } => Some(*prob),
                _ => None,
            })
            .unwrap_or(0.0);

        Ok(Self::new(
            linear[0].0,
            [linear[1].0, linear[2].0, linear[3].0],
            linear[3].1,
        )
        .with_dropout(dropout))
    }
}

/// One layer of the head, as persisted in checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageSpec {
    Linear {
        name: String,
        in_features: usize,
        out_features: usize,
    },
    Relu {
        name: String,
    },
    Dropout {
        name: String,
        prob: f64,
    },
    LogSoftmax {
        name: String,
        dim: usize,
    },
}

/// A host-side copy of one parameter tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    fn from_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> transfer_core::Result<Self> {
        let shape = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Model(format!("failed to read parameter: {e:?}")))?;
        Ok(Self { shape, values })
    }

    fn to_tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        expected: [usize; D],
        device: &B::Device,
    ) -> transfer_core::Result<Tensor<B, D>> {
        if self.shape != expected || self.values.len() != expected.iter().product::<usize>() {
            return Err(Error::Model(format!(
                "parameter {name} has shape {:?}, expected {expected:?}",
                self.shape
            )));
        }
        Ok(Tensor::from_data(
            TensorData::new(self.values.clone(), expected),
            device,
        ))
    }
}

/// Linear stages with ReLU and dropout between them
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    stages: Vec<Linear<B>>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    /// Map features [batch, input_features] to log-probabilities
    /// [batch, num_classes]. Dropout is only applied in [`Mode::Train`].
    pub fn forward(&self, features: Tensor<B, 2>, mode: Mode) -> Tensor<B, 2> {
        let last = self.stages.len() - 1;
        let mut x = features;
        for (i, stage) in self.stages.iter().enumerate() {
            x = stage.forward(x);
            if i < last {
                x = self.activation.forward(x);
                if mode.is_train() {
                    x = self.dropout.forward(x);
                }
            }
        }
        log_softmax(x, 1)
    }

    /// Widths from input features to classes
    pub fn widths(&self) -> Vec<usize> {
        let mut widths = Vec::with_capacity(self.stages.len() + 1);
        for (i, stage) in self.stages.iter().enumerate() {
            let [d_input, d_output] = stage.weight.dims();
            if i == 0 {
                widths.push(d_input);
            }
            widths.push(d_output);
        }
        widths
    }

    pub fn input_features(&self) -> usize {
        self.widths()[0]
    }

    pub fn num_classes(&self) -> usize {
        self.widths().last().copied().unwrap_or(0)
    }

    pub fn dropout_prob(&self) -> f64 {
        self.dropout.prob
    }

    /// Ordered layer description
    pub fn topology(&self) -> Vec<StageSpec> {
        let widths = self.widths();
        let mut topology = Vec::new();
        for i in 0..self.stages.len() {
            let n = i + 1;
            topology.push(StageSpec::Linear {
                name: format!("fc{n}"),
                in_features: widths[i],
                out_features: widths[i + 1],
            });
            if n < self.stages.len() {
                topology.push(StageSpec::Relu {
                    name: format!("relu{n}"),
                });
                topology.push(StageSpec::Dropout {
                    name: format!("dropout{n}"),
                    prob: self.dropout.prob,
                });
            }
        }
        topology.push(StageSpec::LogSoftmax {
            name: "output".to_string(),
            dim: 1,
        });
        topology
    }

    /// Flat `fc{n}.weight` / `fc{n}.bias` map of host-side parameters.
    ///
    /// Weights keep burn's `[in_features, out_features]` layout.
    pub fn state_dict(&self) -> transfer_core::Result<BTreeMap<String, ParamTensor>> {
        let mut state = BTreeMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            let n = i + 1;
            state.insert(
                format!("fc{n}.weight"),
                ParamTensor::from_tensor(stage.weight.val())?,
            );
            if let Some(bias) = &stage.bias {
                state.insert(format!("fc{n}.bias"), ParamTensor::from_tensor(bias.val())?);
            }
        }
        Ok(state)
    }

    /// Rebuild a head from a persisted topology and state.
    pub fn from_state(
        topology: &[StageSpec],
        state: &BTreeMap<String, ParamTensor>,
        device: &B::Device,
    ) -> transfer_core::Result<Self> {
        let config = ClassifierHeadConfig::from_topology(topology)?;
        let mut head = config.init::<B>(device)?;
        let widths = config.widths();

        for (i, stage) in head.stages.iter_mut().enumerate() {
            let n = i + 1;
            let name = format!("fc{n}.weight");
            let weight = state
                .get(&name)
                .ok_or_else(|| Error::Model(format!("missing parameter {name}")))?;
            stage.weight = Param::from_tensor(weight.to_tensor(&name, [widths[i], widths[i + 1]], device)?);

            let name = format!("fc{n}.bias");
            let bias = state
                .get(&name)
                .ok_or_else(|| Error::Model(format!("missing parameter {name}")))?;
            stage.bias = Some(Param::from_tensor(bias.to_tensor(&name, [widths[i + 1]], device)?));
        }

        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> ClassifierHeadConfig {
        ClassifierHeadConfig::new(32, [16, 8, 4], 3)
    }

    #[test]
    fn test_rows_are_log_probabilities() {
        let device = Default::default();
        let head = small_config().init::<TestBackend>(&device).unwrap();
        let features =
            Tensor::<TestBackend, 2>::random([5, 32], Distribution::Normal(0.0, 3.0), &device);

        for mode in [Mode::Train, Mode::Eval] {
            let output = head.forward(features.clone(), mode);
            assert_eq!(output.dims(), [5, 3]);
            let sums = output.exp().sum_dim(1).into_data().to_vec::<f32>().unwrap();
            for sum in sums {
                assert!((sum - 1.0).abs() < 1e-4, "row sums to {sum}");
            }
        }
    }

    #[test]
    fn test_dropout_only_in_train_mode() {
        type Ad = Autodiff<TestBackend>;
        let device = Default::default();
        let head = ClassifierHeadConfig::new(32, [32, 32, 32], 2)
            .with_dropout(0.9)
            .init::<Ad>(&device)
            .unwrap();
        let features = Tensor::<Ad, 2>::ones([4, 32], &device);

        let eval_a = head.forward(features.clone(), Mode::Eval).into_data();
        let eval_b = head.forward(features.clone(), Mode::Eval).into_data();
        assert_eq!(eval_a.to_vec::<f32>().unwrap(), eval_b.to_vec::<f32>().unwrap());

        let train = head.forward(features, Mode::Train).into_data();
        assert_ne!(eval_a.to_vec::<f32>().unwrap(), train.to_vec::<f32>().unwrap());
    }

    #[test]
    fn test_widening_config_is_rejected() {
        let config = ClassifierHeadConfig::new(1024, [1000, 500, 204], 300);
        assert!(matches!(config.check(), Err(Error::Config(_))));

        let config = ClassifierHeadConfig::new(1024, [2048, 500, 204], 10);
        assert!(matches!(config.check(), Err(Error::Config(_))));

        let config = ClassifierHeadConfig::new(1024, [1000, 500, 204], 0);
        assert!(config.check().is_err());
    }

    #[test]
    fn test_topology_layout() {
        let head = small_config().init::<TestBackend>(&Default::default()).unwrap();
        let topology = head.topology();
        assert_eq!(topology.len(), 4 + 3 * 2 + 1);
        assert_eq!(
            topology[0],
            StageSpec::Linear {
                name: "fc1".into(),
                in_features: 32,
                out_features: 16
            }
        );
        assert_eq!(
            topology[2],
            StageSpec::Dropout {
                name: "dropout1".into(),
                prob: 0.5
            }
        );
        assert!(matches!(topology.last(), Some(StageSpec::LogSoftmax { dim: 1, .. })));
        assert_eq!(head.widths(), vec![32, 16, 8, 4, 3]);
        assert_eq!(head.num_classes(), 3);
    }

    #[test]
    fn test_state_roundtrip() {
        let device = Default::default();
        let head = small_config().init::<TestBackend>(&device).unwrap();
        let state = head.state_dict().unwrap();
        assert_eq!(state.len(), 8);
        assert_eq!(state["fc1.weight"].shape, vec![32, 16]);
        assert_eq!(state["fc4.bias"].shape, vec![3]);

        let restored =
            ClassifierHead::<TestBackend>::from_state(&head.topology(), &state, &device).unwrap();
        let features = Tensor::<TestBackend, 2>::ones([2, 32], &device);
        assert_eq!(
            head.forward(features.clone(), Mode::Eval).into_data().to_vec::<f32>().unwrap(),
            restored.forward(features, Mode::Eval).into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_state_shape_mismatch_is_model_error() {
        let device = Default::default();
        let head = small_config().init::<TestBackend>(&device).unwrap();
        let mut state = head.state_dict().unwrap();
        state.insert(
            "fc2.weight".into(),
            ParamTensor {
                shape: vec![1, 1],
                values: vec![0.0],
            },
        );
        let result = ClassifierHead::<TestBackend>::from_state(&head.topology(), &state, &device);
        assert!(matches!(result, Err(Error::Model(_))));
    }
}
