//! JSON-RPC envelopes for the remote dataset catalog.
//!
//! Only the data model lives here; callers bring their own transport and
//! hand the response body to [`decode_response`].

use crate::descriptor::FileDescriptor;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Result code of a successful call.
pub const SUCCESS_CODE: &str = "success";

pub const METHOD_STORE_SOURCE_FILE: &str = "meta.StoreSourceFile";
pub const METHOD_DATASET_LIST: &str = "meta.GetDatasetList";
pub const METHOD_SOURCE_FILE_STATUS: &str = "meta.GetSourceFileStatus";
pub const METHOD_SOURCE_FILE_INFO: &str = "meta.GetSourceFileInfo";
pub const METHOD_DOWNLOAD_FILE_INFO: &str = "meta.GetDownloadFileInfoByIpfsCid";
pub const METHOD_DATASET_REBUILD: &str = "meta.DatasetRebuild";

/// A JSON-RPC request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

/// One uploaded source unit reported to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedData {
    pub source_name: String,
    pub data_size: u64,
    pub is_directory: bool,
    pub ipfs_cid: String,
    pub download_url: String,
}

impl UploadedData {
    /// Describe the archive slice of `desc` for a catalog upload.
    pub fn from_descriptor(desc: &FileDescriptor, is_directory: bool) -> Self {
        Self {
            source_name: desc.source_name.clone(),
            data_size: desc.source_size,
            is_directory,
            ipfs_cid: desc.payload_id.clone(),
            download_url: desc.archive_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetListQuery {
    pub dataset_name: String,
    pub page_num: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileStatusQuery {
    pub dataset_name: String,
    pub ipfs_cid: String,
    pub page_num: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildQuery {
    pub dataset_id: i64,
    pub payload_cids: Vec<String>,
}

impl RpcRequest {
    fn call(method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: 1,
        }
    }

    /// Register uploaded data under `dataset`. At least one upload is required.
    pub fn store_source_file(dataset: &str, uploads: &[UploadedData]) -> Result<Self> {
        if uploads.is_empty() {
            return Err(Error::configuration("at least one upload is required"));
        }
        Ok(Self::call(
            METHOD_STORE_SOURCE_FILE,
            vec![json!(dataset), serde_json::to_value(uploads)?],
        ))
    }

    pub fn dataset_list(query: &DatasetListQuery) -> Result<Self> {
        Ok(Self::call(METHOD_DATASET_LIST, vec![serde_json::to_value(query)?]))
    }

    pub fn source_file_status(query: &SourceFileStatusQuery) -> Result<Self> {
        Ok(Self::call(
            METHOD_SOURCE_FILE_STATUS,
            vec![serde_json::to_value(query)?],
        ))
    }

    pub fn source_file_info(cid: &str) -> Self {
        Self::call(METHOD_SOURCE_FILE_INFO, vec![json!(cid)])
    }

    pub fn download_file_info(cid: &str) -> Self {
        Self::call(METHOD_DOWNLOAD_FILE_INFO, vec![json!(cid)])
    }

    pub fn dataset_rebuild(query: &RebuildQuery) -> Result<Self> {
        Ok(Self::call(
            METHOD_DATASET_REBUILD,
            vec![serde_json::to_value(query)?],
        ))
    }

    /// Serialize the request body.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// The `result` member of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResult<T> {
    pub code: String,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub result: RpcResult<T>,
}

/// Decode a response body, mapping any non-success code to [`Error::Remote`].
///
/// A success envelope with no `data` yields `T::default()`.
pub fn decode_response<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    let response: RpcResponse<T> = serde_json::from_slice(body)?;
    if response.result.code != SUCCESS_CODE {
        return Err(Error::remote(response.result.message));
    }
    Ok(response.result.data.unwrap_or_default())
}
