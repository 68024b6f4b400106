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
// jsonmap.rs
// Helpers for digging values out of loosely typed Redfish JSON, mostly the error
// bodies BMCs send back.

use crate::BiosError;

// JsonMap abstracts over the map types a JSON body can land in.
pub trait JsonMap {
    fn get_value(&self, key: &str) -> Option<&serde_json::Value>;
}

impl JsonMap for serde_json::Map<String, serde_json::Value> {
    fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.get(key)
    }
}

fn missing_key_error(key: &str, url: &str) -> BiosError {
    BiosError::MissingKey {
        key: key.to_string(),
        url: url.to_string(),
    }
}

fn invalid_type_error(key: &str, expected_type: &str, url: &str) -> BiosError {
    BiosError::InvalidKeyType {
        key: key.to_string(),
        expected_type: expected_type.to_string(),
        url: url.to_string(),
    }
}

// get_value retrieves a JSON value from a map, returning MissingKey
// error if the key is not found.
pub fn get_value<'a, M: JsonMap>(
    map: &'a M,
    key: &str,
    url: &str,
) -> Result<&'a serde_json::Value, BiosError> {
    map.get_value(key)
        .ok_or_else(|| missing_key_error(key, url))
}

pub fn get_str<'a, M: JsonMap>(map: &'a M, key: &str, url: &str) -> Result<&'a str, BiosError> {
    get_value(map, key, url)?
        .as_str()
        .ok_or_else(|| invalid_type_error(key, "string", url))
}

pub fn get_object<'a, M: JsonMap>(
    map: &'a M,
    key: &str,
    url: &str,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, BiosError> {
    get_value(map, key, url)?
        .as_object()
        .ok_or_else(|| invalid_type_error(key, "object", url))
}

// extended_info pulls `@Message.ExtendedInfo` out of a Redfish error object
// and pretty prints it with sorted keys.
pub fn extended_info(
    error: &serde_json::Map<String, serde_json::Value>,
    url: &str,
) -> Result<String, BiosError> {
    let info = get_value(error, "@Message.ExtendedInfo", url)?;
    // serde_json::Map is a BTreeMap without preserve_order, so keys come out sorted
    serde_json::to_string_pretty(info).map_err(|source| BiosError::JsonSerializeError {
        url: url.to_string(),
        object_debug: format!("{info:?}"),
        source,
    })
}

// error_diagnostic turns the `error` object of a Redfish response into something
// a human can act on. ExtendedInfo if present, else the message, else the raw JSON.
pub fn error_diagnostic(error: &serde_json::Map<String, serde_json::Value>, url: &str) -> String {
    if let Ok(info) = extended_info(error, url) {
        return info;
    }
    match get_str(error, "message", url) {
        Ok(msg) => msg.to_string(),
        Err(_) => serde_json::Value::Object(error.clone()).to_string(),
    }
}

// body_diagnostic does the same for a raw response body. Bodies that aren't
// a Redfish error document are returned unchanged.
pub fn body_diagnostic(body: &str, url: &str) -> String {
    let parsed: Result<serde_json::Map<String, serde_json::Value>, _> = serde_json::from_str(body);
    match parsed {
        Ok(map) => match get_object(&map, "error", url) {
            Ok(error) => error_diagnostic(error, url),
            Err(_) => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}
