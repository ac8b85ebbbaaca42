//! HTTP 请求封装模块
//!
//! 基于 `window.fetch` 的 `HttpClient` 实现，供浏览器端使用。

use crate::error::{AppError, Result};
use crate::request::{HttpBody, HttpClient, HttpRequest, HttpResponse, MultipartForm, method_str};
use js_sys::{Array, Uint8Array};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, BlobPropertyBag, FormData, Headers, Request, RequestInit, Response};

fn js_err(context: &str, e: JsValue) -> AppError {
    AppError::network(format!("{}: {:?}", context, e))
}

fn form_data(form: &MultipartForm) -> Result<FormData> {
    let data = FormData::new().map_err(|e| js_err("创建 FormData 失败", e))?;
    for (name, value) in &form.fields {
        data.append_with_str(name, value)
            .map_err(|e| js_err("添加表单字段失败", e))?;
    }
    for (name, file) in &form.files {
        let parts = Array::new();
        parts.push(&Uint8Array::from(file.bytes.as_slice()));
        let bag = BlobPropertyBag::new();
        bag.set_type(&file.content_type);
        let blob = Blob::new_with_u8_array_sequence_and_options(&parts, &bag)
            .map_err(|e| js_err("创建 Blob 失败", e))?;
        data.append_with_blob_and_filename(name, &blob, &file.file_name)
            .map_err(|e| js_err("添加文件失败", e))?;
    }
    Ok(data)
}

/// 浏览器 fetch 客户端
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchHttpClient;

#[async_trait::async_trait(?Send)]
impl HttpClient for FetchHttpClient {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let headers = Headers::new().map_err(|e| js_err("创建 Headers 失败", e))?;
        for (key, value) in &req.headers {
            headers
                .set(key, value)
                .map_err(|e| js_err("设置 Header 失败", e))?;
        }

        let opts = RequestInit::new();
        opts.set_method(method_str(req.method));
        opts.set_headers(&headers.into());

        match &req.body {
            Some(HttpBody::Json(body)) => opts.set_body(&JsValue::from_str(body)),
            // 浏览器自动设置 multipart boundary
            Some(HttpBody::Multipart(form)) => opts.set_body(&form_data(form)?.into()),
            None => {}
        }

        let request = Request::new_with_str_and_init(&req.url, &opts)
            .map_err(|e| js_err("构建请求失败", e))?;

        let window =
            web_sys::window().ok_or_else(|| AppError::network("无法获取 window 对象"))?;

        let resp_value = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(|e| js_err("Fetch Error", e))?;

        let response: Response = resp_value
            .dyn_into()
            .map_err(|e| js_err("Response 类型转换失败", e))?;

        let promise = response.text().map_err(|e| js_err("读取响应失败", e))?;
        let text = JsFuture::from(promise)
            .await
            .map_err(|e| js_err("读取响应失败", e))?;

        Ok(HttpResponse {
            status: response.status(),
            body: text.as_string().unwrap_or_default(),
        })
    }
}
