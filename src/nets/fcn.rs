use super::{parse_args, Args, BoxedModule};
use crate::error::Result;
use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FullyConnectedNetArgs {
    pub in_channels: usize,
    pub out_channels: usize,
    #[serde(default)]
    pub hidden_channels: Vec<usize>,
    #[serde(default = "default_bias")]
    pub bias: bool,
}

fn default_bias() -> bool {
    true
}

/// Stack of linear layers with ReLU between them.
#[derive(Debug)]
pub struct FullyConnectedNet {
    hidden: Vec<Linear>,
    output: Linear,
}

impl FullyConnectedNet {
    pub fn new(args: &FullyConnectedNetArgs, vb: VarBuilder) -> Result<Self> {
        let layer = |in_dim, out_dim, vb| {
            if args.bias {
                candle_nn::linear(in_dim, out_dim, vb)
            } else {
                candle_nn::linear_no_bias(in_dim, out_dim, vb)
            }
        };

        let mut hidden = Vec::with_capacity(args.hidden_channels.len());
        let mut in_dim = args.in_channels;
        for (i, &out_dim) in args.hidden_channels.iter().enumerate() {
            hidden.push(layer(in_dim, out_dim, vb.pp("hidden").pp(i))?);
            in_dim = out_dim;
        }
        let output = layer(in_dim, args.out_channels, vb.pp("output"))?;

        Ok(Self { hidden, output })
    }
}

impl Module for FullyConnectedNet {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for layer in &self.hidden {
            h = layer.forward(&h)?.relu()?;
        }
        self.output.forward(&h)
    }
}

pub fn build(args: &Args, vb: VarBuilder) -> Result<BoxedModule> {
    let args: FullyConnectedNetArgs = parse_args("FullyConnectedNet", args)?;
    Ok(Box::new(FullyConnectedNet::new(&args, vb)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn forward_maps_features_to_outputs() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let args = FullyConnectedNetArgs {
            in_channels: 4,
            out_channels: 2,
            hidden_channels: vec![8, 6],
            bias: false,
        };
        let net = FullyConnectedNet::new(&args, vb).unwrap();

        let xs = Tensor::ones((3, 4), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(net.forward(&xs).unwrap().dims(), &[3, 2]);

        let mut names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        names.sort();
        assert_eq!(names, ["hidden.0.weight", "hidden.1.weight", "output.weight"]);
    }
}
