//! The ERC-20 interface (fixed, compiled in) and the operator-supplied ABI
//! bundle (loaded at startup).
//!
//! The fixed interface uses a `sol!`-macro binding for the one contract
//! shape this system always needs to speak. Everything else (the deployed
//! security token, any custom verifier contract) comes from the bundle and
//! is resolved dynamically by name at call time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_json_abi::JsonAbi;
use alloy_primitives::Bytes;
use alloy_sol_types::sol;
use serde::Deserialize;

use crate::error::ChainError;

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function name() external view returns (string);
        function totalSupply() external view returns (uint256);
        event Transfer(address indexed from, address indexed to, uint256 value);
        /// Non-standard mint event some token contracts in this family emit
        /// alongside (or instead of) a null-address `Transfer`.
        event Issued(address indexed to, uint256 value);
    }
}

/// One compiled-contract artifact, Hardhat/Foundry JSON shape:
/// `{abi, bytecode, bytecodeRuntime?, metadata?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
    pub abi: JsonAbi,
    #[serde(default)]
    pub bytecode: Option<Bytes>,
    #[serde(default)]
    pub bytecode_runtime: Option<Bytes>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A keyed mapping `contract name -> artifact`, loaded from a directory of
/// `<name>.json` files at startup.
#[derive(Debug, Clone, Default)]
pub struct AbiBundle {
    contracts: HashMap<String, ContractArtifact>,
}

impl AbiBundle {
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ChainError> {
        let mut contracts = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let contents = fs::read_to_string(&path)?;
            let artifact: ContractArtifact = serde_json::from_str(&contents)?;
            contracts.insert(name, artifact);
        }
        Ok(Self { contracts })
    }

    pub fn get(&self, name: &str) -> Result<&ContractArtifact, ChainError> {
        self.contracts
            .get(name)
            .ok_or_else(|| ChainError::InvalidContract(name.to_string()))
    }

    /// Encodes a constructor call: `bytecode || abi-encoded constructor args`.
    pub fn encode_deploy(&self, contract: &str, args: &[DynSolValue]) -> Result<Bytes, ChainError> {
        let artifact = self.get(contract)?;
        let bytecode = artifact
            .bytecode
            .clone()
            .ok_or_else(|| ChainError::MissingBytecode(contract.to_string()))?;
        let mut out = bytecode.to_vec();
        if let Some(ctor) = &artifact.abi.constructor {
            let encoded = ctor
                .abi_encode_input(args)
                .map_err(|e| ChainError::AbiEncode(e.to_string()))?;
            out.extend_from_slice(&encoded);
        }
        Ok(Bytes::from(out))
    }

    /// Encodes a function call by name, resolving overload by argument count.
    pub fn encode_call(
        &self,
        contract: &str,
        func_name: &str,
        args: &[DynSolValue],
    ) -> Result<Bytes, ChainError> {
        let artifact = self.get(contract)?;
        let function = artifact
            .abi
            .functions()
            .find(|f| f.name == func_name && f.inputs.len() == args.len())
            .ok_or_else(|| ChainError::InvalidFunction {
                contract: contract.to_string(),
                func: func_name.to_string(),
            })?;
        let encoded = function
            .abi_encode_input(args)
            .map_err(|e| ChainError::AbiEncode(e.to_string()))?;
        Ok(Bytes::from(encoded))
    }
}
