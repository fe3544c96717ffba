use authdata_plugin::ModuleResult;

/// Append `src` onto `dst`, growing the destination with fallible
/// reservation so exhaustion surfaces as an error instead of an abort.
///
/// Elements are moved, never cloned; ownership of any payload they
/// reference transfers with them, so nothing can be released twice.
pub(crate) fn merge_append<T>(dst: &mut Vec<T>, mut src: Vec<T>) -> ModuleResult<()> {
    dst.try_reserve(src.len())?;
    dst.append(&mut src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_preserves_order_and_length() {
        let mut dst = vec!["x1".to_string(), "x2".to_string()];
        merge_append(&mut dst, vec!["y1".to_string()]).unwrap();
        assert_eq!(dst, vec!["x1", "x2", "y1"]);
        assert_eq!(dst.len(), 3);
    }

    #[test]
    fn test_merge_empty_source_is_noop() {
        let mut dst = vec![1, 2];
        merge_append(&mut dst, Vec::new()).unwrap();
        assert_eq!(dst, vec![1, 2]);
    }

    #[test]
    fn test_merge_into_empty_destination() {
        let mut dst: Vec<u8> = Vec::new();
        merge_append(&mut dst, vec![9]).unwrap();
        assert_eq!(dst, vec![9]);
    }
}
