/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum BiosError {
    #[error("Network error talking to BMC at {url}. {source}")]
    NetworkError { url: String, source: reqwest::Error },

    #[error("HTTP {status_code} at {url}. See debug logs for details.")]
    HTTPErrorCode {
        url: String,
        status_code: StatusCode,
        response_body: String,
    },

    #[error("Could not deserialize response from {url}. Body: {body}. {source}")]
    JsonDeserializeError {
        url: String,
        body: String,
        source: serde_json::Error,
    },

    #[error("Could not serialize request body for {url}. Obj: {object_debug}. {source}")]
    JsonSerializeError {
        url: String,
        object_debug: String,
        source: serde_json::Error,
    },

    #[error("Remote returned empty body")]
    NoContent,

    #[error("Missing key {key} in JSON at {url}")]
    MissingKey { key: String, url: String },

    #[error("Key {key} should be {expected_type} at {url}")]
    InvalidKeyType {
        key: String,
        expected_type: String,
        url: String,
    },

    #[error("Invalid credentials for {host}, HTTP {status_code} at {url}: {diagnostic}")]
    AuthError {
        host: String,
        url: String,
        status_code: StatusCode,
        diagnostic: String,
    },

    #[error("Error connecting to {host}: retries exhausted after {attempts} attempts. {reason}")]
    TransportError {
        host: String,
        attempts: u32,
        reason: String,
    },

    #[error("No settings defined for {vendor}/{architecture}/{model}")]
    MissingDefinition {
        vendor: String,
        architecture: String,
        model: String,
    },

    #[error("BMC at {url} rejected the request with HTTP {status_code}: {diagnostic}")]
    Rejected {
        url: String,
        status_code: StatusCode,
        diagnostic: String,
    },

    #[error("BMC at {url} reported an error: {detail}")]
    ResourceError { url: String, detail: String },

    #[error("Could not read or write {path}. {source}")]
    FileError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse {path}. {source}")]
    YamlError {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Hosts cannot be compared: {0}")]
    Incomparable(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl BiosError {
    /// True for failures that mean the host could not be reached or logged in to at all.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            BiosError::AuthError { .. }
                | BiosError::TransportError { .. }
                | BiosError::NetworkError { .. }
        )
    }
}
