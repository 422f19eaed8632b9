//! Status codes reported by the client and the server.
//!
//! Server codes are the non-negative values carried in the `result_code`
//! byte of every response message. Client-side codes are negative so they
//! never collide with anything a server can return.

use std::fmt;

/// Broad classification of a failure.
///
/// | Kind | Typical codes |
/// |------|---------------|
/// | `Connection` | `InvalidHost`, `AsyncConnection` |
/// | `Protocol` | `Client` (malformed response) |
/// | `Parameter` | `Param`, `BinName` |
/// | `Record` | `RecordNotFound`, `Generation`, `RecordExists`, ... |
/// | `Cluster` | `InvalidNode`, `NoMoreConnections`, `PartitionUnavailable` |
/// | `Security` | `NotAuthenticated`, `InvalidPassword`, ... |
/// | `Index` | `IndexFound`, `IndexNotFound`, ... |
/// | `Query` | `QueryAborted`, `ScanAborted`, ... |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host unreachable, DNS failure, socket failure
    Connection,
    /// Malformed or unexpected response bytes
    Protocol,
    /// Invalid request shape detected before contacting the server
    Parameter,
    /// Generic cluster-side failure
    Server,
    /// Record-level application error
    Record,
    /// Per-attempt timeout elapsed
    Timeout,
    /// Partition map changed while the operation ran
    ClusterChange,
    /// Operation cancelled by the caller
    ClientAbort,
    /// Authentication or authorization failure
    Security,
    /// Secondary-index lifecycle failure
    Index,
    /// Query or scan execution failure on the server
    Query,
    /// Routing or pool capacity failure inside the client
    Cluster,
    /// User-defined function failure
    Udf,
}

macro_rules! result_codes {
    ($( $(#[$doc:meta])* $name:ident = $code:literal, $kind:ident, $msg:literal; )*) => {
        /// Stable status code attached to every response and error.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResultCode {
            $( $(#[$doc])* $name, )*
            /// A code this client does not know about
            Unknown(i32),
        }

        impl ResultCode {
            /// Map a numeric code to a `ResultCode`.
            pub fn from_code(code: i32) -> Self {
                match code {
                    $( $code => ResultCode::$name, )*
                    other => ResultCode::Unknown(other),
                }
            }

            /// Numeric value of this code.
            pub fn code(&self) -> i32 {
                match self {
                    $( ResultCode::$name => $code, )*
                    ResultCode::Unknown(c) => *c,
                }
            }

            /// Failure classification of this code.
            pub fn kind(&self) -> ErrorKind {
                match self {
                    $( ResultCode::$name => ErrorKind::$kind, )*
                    ResultCode::Unknown(_) => ErrorKind::Server,
                }
            }

            /// Human-readable description.
            pub fn description(&self) -> &'static str {
                match self {
                    $( ResultCode::$name => $msg, )*
                    ResultCode::Unknown(_) => "unknown result code",
                }
            }
        }
    };
}

result_codes! {
    /// No node owns the partition, or the node is unknown
    InvalidNode = -8, Cluster, "invalid node";
    /// Per-node connection limit reached
    NoMoreConnections = -7, Cluster, "no more connections available";
    /// Asynchronous connection failure
    AsyncConnection = -6, Connection, "connection failure";
    /// Cancelled by the caller
    ClientAbort = -5, ClientAbort, "client abort";
    /// Host could not be resolved or reached
    InvalidHost = -4, Connection, "invalid host";
    /// Stream finished
    NoMoreRecords = -3, Query, "no more records";
    /// Invalid parameter supplied by the caller
    Param = -2, Parameter, "invalid parameter";
    /// Generic client-side failure
    Client = -1, Protocol, "client error";
    /// Success
    Ok = 0, Server, "ok";
    /// Generic server error
    Server = 1, Server, "server error";
    /// Record does not exist
    RecordNotFound = 2, Record, "record not found";
    /// Generation check failed
    Generation = 3, Record, "generation mismatch";
    /// Malformed request
    RequestInvalid = 4, Server, "request invalid";
    /// Record already exists
    RecordExists = 5, Record, "record already exists";
    /// Bin already exists
    BinExists = 6, Record, "bin already exists";
    /// Cluster changed during the operation
    ClusterChange = 7, ClusterChange, "cluster change";
    /// Server storage full
    ServerFull = 8, Server, "server full";
    /// Server-side timeout
    Timeout = 9, Timeout, "timeout";
    /// Operation not allowed in the current configuration
    AlwaysForbidden = 10, Server, "operation forbidden (xdr)";
    /// Partition not available
    PartitionUnavailable = 11, Cluster, "partition unavailable";
    /// Bin type does not support the operation
    BinIncompatibleType = 12, Record, "bin incompatible type";
    /// Record larger than the server allows
    RecordTooBig = 13, Record, "record too big";
    /// Record hot key contention
    RecordBusy = 14, Record, "record busy";
    /// Scan aborted by the server
    ScanAborted = 15, Query, "scan aborted";
    /// Feature unsupported by the server
    UnsupportedFeature = 16, Server, "unsupported feature";
    /// Bin not found
    BinNotFound = 17, Record, "bin not found";
    /// Storage device overloaded
    DeviceOverload = 18, Server, "device overload";
    /// Stored user key differs from the request key
    KeyMismatch = 19, Record, "key mismatch";
    /// Namespace unknown to the server
    NamespaceNotFound = 20, Server, "namespace not found";
    /// Bin name too long or invalid
    BinName = 21, Parameter, "invalid bin name";
    /// Operation forbidden
    FailForbidden = 22, Server, "operation forbidden";
    /// Query stream finished
    QueryEnd = 50, Query, "query end";
    /// Security features not supported
    SecurityNotSupported = 51, Security, "security not supported";
    /// Security features not enabled
    SecurityNotEnabled = 52, Security, "security not enabled";
    /// Security scheme not supported
    SecuritySchemeNotSupported = 53, Security, "security scheme not supported";
    /// Unknown administrative command
    InvalidCommand = 54, Security, "invalid command";
    /// Invalid administrative field
    InvalidField = 55, Security, "invalid field";
    /// Invalid security state
    IllegalState = 56, Security, "illegal state";
    /// Unknown user
    InvalidUser = 60, Security, "invalid user";
    /// User already exists
    UserAlreadyExists = 61, Security, "user already exists";
    /// Wrong password
    InvalidPassword = 62, Security, "invalid password";
    /// Password expired
    ExpiredPassword = 63, Security, "expired password";
    /// Password forbidden
    ForbiddenPassword = 64, Security, "forbidden password";
    /// Credential rejected
    InvalidCredential = 65, Security, "invalid credential";
    /// Unknown role
    InvalidRole = 70, Security, "invalid role";
    /// Role already exists
    RoleAlreadyExists = 71, Security, "role already exists";
    /// Unknown privilege
    InvalidPrivilege = 72, Security, "invalid privilege";
    /// Not authenticated
    NotAuthenticated = 80, Security, "not authenticated";
    /// Role does not permit the operation
    RoleViolation = 81, Security, "role violation";
    /// User-defined function failed
    Udf = 100, Udf, "udf error";
    /// Batch disabled on the server
    BatchDisabled = 150, Server, "batch disabled";
    /// Too many batch requests
    BatchMaxRequests = 151, Server, "batch max requests exceeded";
    /// Batch queues full
    BatchQueuesFull = 152, Server, "batch queues full";
    /// Invalid GeoJSON
    GeoInvalidGeoJson = 160, Parameter, "invalid geojson";
    /// Index already exists
    IndexFound = 200, Index, "index already exists";
    /// Index not found
    IndexNotFound = 201, Index, "index not found";
    /// Index out of memory
    IndexOom = 202, Index, "index out of memory";
    /// Index not readable
    IndexNotReadable = 203, Index, "index not readable";
    /// Generic index error
    Index = 204, Index, "index error";
    /// Index name too long
    IndexNameMaxLen = 205, Index, "index name too long";
    /// Too many indexes
    IndexMaxCount = 206, Index, "index count exceeded";
    /// Query aborted
    QueryAborted = 210, Query, "query aborted";
    /// Query queue full
    QueryQueueFull = 211, Query, "query queue full";
    /// Query timed out on the server
    QueryTimeout = 212, Query, "query timeout";
    /// Generic query error
    Query = 213, Query, "query error";
    /// UDF module or function not found
    UdfNotFound = 1301, Udf, "udf not found";
    /// UDF source file not found
    LuaFileNotFound = 1302, Udf, "lua file not found";
}

impl ResultCode {
    /// True for `Ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }
}

impl From<u8> for ResultCode {
    fn from(code: u8) -> Self {
        ResultCode::from_code(code as i32)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}
