use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("File too large: {0}")]
    TooLarge(String),
}

impl FsError {
    /// 转换为返回给内核的 errno
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsDirectory(_) => libc::EISDIR,
            // 只读条目与只读挂载统一报告 EROFS
            FsError::PermissionDenied(_) => libc::EROFS,
            FsError::NotPermitted(_) => libc::EPERM,
            FsError::Unsupported(_) => libc::ENOTSUP,
            FsError::InvalidOperation(_) => libc::EINVAL,
            FsError::TooLarge(_) => libc::EFBIG,
            FsError::Storage(_) => libc::EIO,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// 读取/删除路径上的存储故障按 NotFound 上报
    pub fn into_not_found(self) -> FsError {
        match self {
            FsError::Storage(msg) => FsError::NotFound(msg),
            FsError::Io(e) => FsError::NotFound(e.to_string()),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound("/a".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists("/a".into()).errno(), libc::EEXIST);
        assert_eq!(FsError::NotEmpty("/a".into()).errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::PermissionDenied("/a".into()).errno(), libc::EROFS);
        assert_eq!(FsError::Unsupported("xattr".into()).errno(), libc::ENOTSUP);
        assert_eq!(FsError::TooLarge("/a".into()).errno(), libc::EFBIG);
        assert_eq!(FsError::Storage("boom".into()).errno(), libc::EIO);
    }

    #[test]
    fn test_read_failures_become_not_found() {
        let err = FsError::Storage("connection reset".into()).into_not_found();
        assert!(matches!(err, FsError::NotFound(_)));

        let err = FsError::NotEmpty("/d".into()).into_not_found();
        assert!(matches!(err, FsError::NotEmpty(_)));
    }
}
