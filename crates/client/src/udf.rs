//! Record UDF results

use aerie_core::{Error, Result, ResultCode, Value};
use aerie_wire::Response;

/// Bin carrying a UDF's return value.
pub const SUCCESS_BIN: &str = "SUCCESS";
/// Bin carrying a UDF's error message.
pub const FAILURE_BIN: &str = "FAILURE";

/// Extract the return value of a record UDF call.
///
/// A function that returns nothing yields `Value::Null`. A failing
/// function surfaces as a `Udf` server error carrying its message.
pub(crate) fn udf_result(mut resp: Response) -> Result<Value> {
    match resp.result_code {
        ResultCode::Ok => {
            if let Some(msg) = resp.bins.remove(FAILURE_BIN) {
                return Err(Error::server(ResultCode::Udf, failure_message(msg)));
            }
            Ok(resp.bins.remove(SUCCESS_BIN).unwrap_or(Value::Null))
        }
        code => match resp.bins.remove(FAILURE_BIN) {
            Some(msg) => Err(Error::server(code, failure_message(msg))),
            None => Err(Error::from_code(code)),
        },
    }
}

fn failure_message(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerie_core::bins;

    fn response(code: ResultCode, bins: aerie_core::Bins) -> Response {
        Response {
            result_code: code,
            last: false,
            batch_index: 0,
            metadata: Default::default(),
            namespace: None,
            set: None,
            digest: None,
            user_key: None,
            bins,
        }
    }

    #[test]
    fn test_success_value() {
        let v = udf_result(response(ResultCode::Ok, bins! { "SUCCESS" => 7 })).unwrap();
        assert_eq!(v, Value::Int(7));
        let v = udf_result(response(ResultCode::Ok, Default::default())).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn test_failure_carries_message() {
        let err = udf_result(response(ResultCode::Udf, bins! { "FAILURE" => "boom" })).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::Udf);
        assert!(err.to_string().contains("boom"));
        let err = udf_result(response(ResultCode::RecordNotFound, Default::default())).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::RecordNotFound);
    }
}
