//! Stonegate admin CLI: user/key/bucket administration, usage and log
//! inspection, and backend maintenance, against the same data directory
//! the gateway serves.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use stonegate::admin::bucket as bucket_admin;
use stonegate::config::Config;
use stonegate::dates::{parse_admin_date, parse_admin_epoch};
use stonegate::fmt::{self, Formatter};
use stonegate::iam::types::KeyType;
use stonegate::iam::{parse_access, UserAdminRequest, UserDb};
use stonegate::storage::{FilesystemBackend, StorageBackend, UsageEntry, UsageKey};

/// Stonegate administration tool
#[derive(Parser, Debug)]
#[command(name = "stonegate-admin")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Output format for certain operations: xml, json
    #[arg(long, global = true)]
    format: Option<String>,

    /// Pretty-print the output
    #[arg(long, global = true)]
    pretty_format: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// User administration
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },
    /// Subuser administration
    Subuser {
        #[command(subcommand)]
        cmd: SubuserCmd,
    },
    /// Access key administration
    Key {
        #[command(subcommand)]
        cmd: KeyCmd,
    },
    /// User capability administration
    Caps {
        #[command(subcommand)]
        cmd: CapsCmd,
    },
    /// Bucket administration
    Bucket {
        #[command(subcommand)]
        cmd: BucketCmd,
    },
    /// Bucket listing
    Buckets {
        #[command(subcommand)]
        cmd: BucketsCmd,
    },
    /// Object administration
    Object {
        #[command(subcommand)]
        cmd: ObjectCmd,
    },
    /// Read a bucket or object ACL policy
    Policy {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        object: Option<String>,
    },
    /// Placement pool administration
    Pool {
        #[command(subcommand)]
        cmd: PoolCmd,
    },
    /// Placement pool listing
    Pools {
        #[command(subcommand)]
        cmd: PoolsCmd,
    },
    /// Request log inspection
    Log {
        #[command(subcommand)]
        cmd: LogCmd,
    },
    /// Usage accounting
    Usage {
        #[command(subcommand)]
        cmd: UsageCmd,
    },
    /// Temporary object cleanup
    Temp {
        #[command(subcommand)]
        cmd: TempCmd,
    },
    /// Garbage collection
    Gc {
        #[command(subcommand)]
        cmd: GcCmd,
    },
    /// Cluster information
    Cluster {
        #[command(subcommand)]
        cmd: ClusterCmd,
    },
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum KeyTypeArg {
    #[default]
    S3,
    Swift,
}

/// Flags shared by the identity commands.
#[derive(Args, Debug, Default)]
struct IdentityArgs {
    /// User id
    #[arg(short = 'i', long)]
    uid: Option<String>,
    #[arg(short = 'n', long)]
    display_name: Option<String>,
    #[arg(short = 'e', long)]
    email: Option<String>,
    /// S3 access key
    #[arg(long)]
    access_key: Option<String>,
    /// Specify secret key
    #[arg(long)]
    secret: Option<String>,
    /// Generate random access key (for S3)
    #[arg(long)]
    gen_access_key: bool,
    /// Generate random secret key
    #[arg(long)]
    gen_secret: bool,
    /// Key type, options are: swift, s3
    #[arg(long, value_enum)]
    key_type: Option<KeyTypeArg>,
    /// Subuser name
    #[arg(long)]
    subuser: Option<String>,
    /// Access permissions for sub-user: read, write, readwrite, full
    #[arg(long)]
    access: Option<String>,
    #[arg(long)]
    max_buckets: Option<i32>,
    /// List of caps (e.g., "usage=read, write; users=read")
    #[arg(long)]
    caps: Option<String>,
    /// When specified, subuser removal also purges the subuser keys
    #[arg(long)]
    purge_keys: bool,
    /// When specified, user removal also purges all the user data
    #[arg(long)]
    purge_data: bool,
}

impl IdentityArgs {
    fn to_request(&self) -> Result<UserAdminRequest, String> {
        let perm_mask = match &self.access {
            Some(access) => Some(
                parse_access(access).ok_or_else(|| format!("bad access spec: {}", access))?,
            ),
            None => None,
        };
        Ok(UserAdminRequest {
            user_id: self.uid.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            access_key_id: self.access_key.clone(),
            secret_key: self.secret.clone(),
            gen_access_key: self.gen_access_key,
            gen_secret: self.gen_secret,
            key_type: match self.key_type.unwrap_or_default() {
                KeyTypeArg::S3 => KeyType::S3,
                KeyTypeArg::Swift => KeyType::Swift,
            },
            subuser: self.subuser.clone(),
            perm_mask,
            purge_keys: self.purge_keys,
            max_buckets: self.max_buckets,
            suspended: None,
            caps: self.caps.clone(),
        })
    }
}

#[derive(Subcommand, Debug)]
enum UserCmd {
    /// Create a new user
    Create(IdentityArgs),
    /// Modify user
    Modify(IdentityArgs),
    /// Get user info
    Info(IdentityArgs),
    /// Remove user
    Rm(IdentityArgs),
    /// Suspend a user
    Suspend(IdentityArgs),
    /// Re-enable user after suspension
    Enable(IdentityArgs),
}

#[derive(Subcommand, Debug)]
enum SubuserCmd {
    /// Create a new subuser
    Create(IdentityArgs),
    /// Modify subuser
    Modify(IdentityArgs),
    /// Remove subuser
    Rm(IdentityArgs),
}

#[derive(Subcommand, Debug)]
enum KeyCmd {
    /// Create access key
    Create(IdentityArgs),
    /// Remove access key
    Rm(IdentityArgs),
}

#[derive(Subcommand, Debug)]
enum CapsCmd {
    /// Add user capabilities
    Add(IdentityArgs),
    /// Remove user capabilities
    Rm(IdentityArgs),
}

#[derive(Subcommand, Debug)]
enum BucketCmd {
    /// List buckets
    List {
        #[arg(long)]
        uid: Option<String>,
    },
    /// Link bucket to specified user
    Link {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        bucket: String,
    },
    /// Unlink bucket from specified user
    Unlink {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        bucket: String,
    },
    /// Returns bucket statistics
    Stats {
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        uid: Option<String>,
    },
    /// Remove bucket
    Rm {
        #[arg(long)]
        bucket: String,
        /// Remove the bucket's objects before deleting it
        #[arg(long)]
        purge_objects: bool,
    },
    /// Check bucket index
    Check {
        #[arg(long)]
        bucket: String,
        /// Besides checking the index, also fix it
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BucketsCmd {
    /// List buckets
    List {
        #[arg(long)]
        uid: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ObjectCmd {
    /// Remove object
    Rm {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        object: String,
    },
}

#[derive(Subcommand, Debug)]
enum PoolCmd {
    /// Add an existing pool for data placement
    Add {
        #[arg(short = 'p', long)]
        pool: String,
    },
    /// Remove an existing pool from the data placement set
    Rm {
        #[arg(short = 'p', long)]
        pool: String,
    },
}

#[derive(Subcommand, Debug)]
enum PoolsCmd {
    /// List placement active set
    List,
}

#[derive(Subcommand, Debug)]
enum LogCmd {
    /// List log objects
    List {
        #[arg(long)]
        date: Option<String>,
    },
    /// Dump a log from specific object or (bucket + date + bucket-id)
    Show {
        #[arg(short = 'o', long)]
        object: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(short = 'b', long)]
        bucket: Option<String>,
        #[arg(long)]
        bucket_id: Option<String>,
        #[arg(long)]
        show_log_entries: Option<bool>,
        #[arg(long)]
        show_log_sum: Option<bool>,
        /// Only dump entries with a non-zero numeric field
        #[arg(long)]
        skip_zero_entries: bool,
    },
    /// Remove log object
    Rm {
        #[arg(short = 'o', long)]
        object: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(short = 'b', long)]
        bucket: Option<String>,
        #[arg(long)]
        bucket_id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum UsageCmd {
    /// Show usage (by user, date range)
    Show {
        #[arg(long)]
        uid: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        /// Comma separated list of categories
        #[arg(long)]
        categories: Option<String>,
        #[arg(long)]
        show_log_entries: Option<bool>,
        #[arg(long)]
        show_log_sum: Option<bool>,
    },
    /// Trim usage (by user, date range)
    Trim {
        #[arg(long)]
        uid: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        /// Required for certain operations
        #[arg(long)]
        yes_i_really_mean_it: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TempCmd {
    /// Remove temporary objects created up to the specified date
    Remove {
        #[arg(long)]
        date: String,
    },
}

#[derive(Subcommand, Debug)]
enum GcCmd {
    /// Dump expired garbage collection objects
    List,
    /// Manually process garbage
    Process,
}

#[derive(Subcommand, Debug)]
enum ClusterCmd {
    /// Show cluster params info
    Info,
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("ERROR: {}", msg);
    std::process::exit(1);
}

fn flush(f: &mut dyn Formatter) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if f.flush(&mut out).is_err() {
        std::process::exit(1);
    }
    let _ = out.write_all(b"\n");
}

fn show_user_info(users: &UserDb, uid: &Option<String>, f: &mut dyn Formatter) {
    let uid = match uid.as_deref() {
        Some(u) => u,
        None => return,
    };
    if let Ok(user) = users.info(uid) {
        user.dump(f);
        flush(f);
    }
}

/// Assemble a log object name from the show/rm flags:
/// an explicit object, or `date-bucket_id-bucket`.
fn log_object_name(
    object: &Option<String>,
    date: &Option<String>,
    bucket: &Option<String>,
    bucket_id: &Option<String>,
) -> String {
    if let Some(object) = object {
        return object.clone();
    }
    match (date, bucket, bucket_id) {
        (Some(date), Some(bucket), Some(bucket_id)) => {
            format!("{}-{}-{}", date, bucket_id, bucket)
        }
        _ => fail("object or (at least one of date, bucket, bucket-id) were not specified"),
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // help/version are not failures; unknown flags and commands are
            let ok = matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            std::process::exit(if ok { 0 } else { 1 });
        }
    };

    // default to pretty json
    let (format, pretty) = match &cli.format {
        Some(f) => (f.as_str(), cli.pretty_format),
        None => ("json", true),
    };
    let mut formatter = match fmt::for_format(format, pretty) {
        Some(f) => f,
        None => fail(format!("unrecognized format: {}", format)),
    };
    let f = formatter.as_mut();

    let config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => fail(e),
        },
        None => Config::load(),
    };

    let backend = match FilesystemBackend::new(config.data_dir.clone()).await {
        Ok(b) => b,
        Err(e) => fail(format!("couldn't init storage provider: {}", e)),
    };
    let users = match UserDb::open(config.iam_path()) {
        Ok(u) => u,
        Err(e) => fail(format!("couldn't open user database: {}", e)),
    };

    match cli.command {
        Command::User { cmd } => run_user_cmd(cmd, &backend, &users, f).await,
        Command::Subuser { cmd } => run_subuser_cmd(cmd, &users, f),
        Command::Key { cmd } => run_key_cmd(cmd, &users, f),
        Command::Caps { cmd } => run_caps_cmd(cmd, &users, f),
        Command::Bucket { cmd } => run_bucket_cmd(cmd, &backend, &users, f).await,
        Command::Buckets { cmd } => match cmd {
            BucketsCmd::List { uid } => list_buckets(&backend, &uid, f).await,
        },
        Command::Object { cmd } => match cmd {
            ObjectCmd::Rm { bucket, object } => {
                if let Err(e) = bucket_admin::remove_object(&backend, &bucket, &object).await {
                    fail(format!("object remove returned: {}", e));
                }
            }
        },
        Command::Policy { bucket, object } => {
            let key = object.as_deref().filter(|o| !o.is_empty());
            match backend.get_attr(&bucket, key, stonegate::storage::ACL_ATTR).await {
                Ok(data) => match stonegate::acl::AclPolicy::decode(&data) {
                    Some(policy) => println!("{}", policy.to_xml()),
                    None => fail("could not decode policy"),
                },
                Err(e) => fail(format!("failed to read policy: {}", e)),
            }
        }
        Command::Pool { cmd } => match cmd {
            PoolCmd::Add { pool } => {
                if let Err(e) = backend.add_pool(&pool).await {
                    fail(format!("failed to add bucket placement: {}", e));
                }
            }
            PoolCmd::Rm { pool } => {
                if let Err(e) = backend.remove_pool(&pool).await {
                    fail(format!("failed to remove bucket placement: {}", e));
                }
            }
        },
        Command::Pools { cmd } => match cmd {
            PoolsCmd::List => match backend.list_pools().await {
                Ok(pools) => {
                    f.open_array_section("pools");
                    for pool in pools {
                        f.open_object_section("pool");
                        f.dump_string("name", &pool);
                        f.close_section();
                    }
                    f.close_section();
                    flush(f);
                }
                Err(e) => fail(format!("could not list placement set: {}", e)),
            },
        },
        Command::Log { cmd } => run_log_cmd(cmd, &backend, f).await,
        Command::Usage { cmd } => run_usage_cmd(cmd, &backend, f).await,
        Command::Temp { cmd } => match cmd {
            TempCmd::Remove { date } => {
                let cutoff = match parse_admin_date(&date) {
                    Some(t) => t,
                    None => fail(format!("failure parsing date: {}", date)),
                };
                if let Err(e) = backend.remove_temp_objects(cutoff).await {
                    fail(format!("failure removing temp objects: {}", e));
                }
            }
        },
        Command::Gc { cmd } => run_gc_cmd(cmd, &backend, f).await,
        Command::Cluster { cmd } => match cmd {
            ClusterCmd::Info => {
                f.open_object_section("cluster");
                for (name, value) in backend.params() {
                    f.dump_string(&name, &value);
                }
                f.close_section();
                flush(f);
            }
        },
    }
}

async fn run_user_cmd(
    cmd: UserCmd,
    backend: &FilesystemBackend,
    users: &UserDb,
    f: &mut dyn Formatter,
) {
    match cmd {
        UserCmd::Create(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.add_user(&req) {
                fail(format!("could not create user: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
        UserCmd::Modify(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.modify_user(&req) {
                fail(format!("could not modify user: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
        UserCmd::Info(args) => {
            let uid = args.uid.as_deref().unwrap_or_else(|| fail("user id was not specified"));
            match users.info(uid) {
                Ok(user) => {
                    user.dump(f);
                    flush(f);
                }
                Err(e) => fail(format!("could not fetch user info: {}", e)),
            }
        }
        UserCmd::Rm(args) => {
            let uid = args.uid.as_deref().unwrap_or_else(|| fail("user id was not specified"));
            if let Err(e) = bucket_admin::remove_user(backend, users, uid, args.purge_data).await {
                fail(format!("could not remove user: {}", e));
            }
        }
        UserCmd::Suspend(args) => set_suspended(users, &args, true, f),
        UserCmd::Enable(args) => set_suspended(users, &args, false, f),
    }
}

fn set_suspended(users: &UserDb, args: &IdentityArgs, suspended: bool, f: &mut dyn Formatter) {
    let mut req = args.to_request().unwrap_or_else(|e| fail(e));
    req.suspended = Some(suspended);
    if let Err(e) = users.modify_user(&req) {
        let verb = if suspended { "suspend" } else { "enable" };
        fail(format!("could not {} user: {}", verb, e));
    }
    show_user_info(users, &args.uid, f);
}

fn run_subuser_cmd(cmd: SubuserCmd, users: &UserDb, f: &mut dyn Formatter) {
    match cmd {
        SubuserCmd::Create(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.add_subuser(&req) {
                fail(format!("could not create subuser: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
        SubuserCmd::Modify(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.modify_subuser(&req) {
                fail(format!("could not modify subuser: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
        SubuserCmd::Rm(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.remove_subuser(&req) {
                fail(format!("could not remove subuser: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
    }
}

fn run_key_cmd(cmd: KeyCmd, users: &UserDb, f: &mut dyn Formatter) {
    match cmd {
        KeyCmd::Create(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.add_key(&req) {
                fail(format!("could not create key: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
        KeyCmd::Rm(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.remove_key(&req) {
                fail(format!("could not remove key: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
    }
}

fn run_caps_cmd(cmd: CapsCmd, users: &UserDb, f: &mut dyn Formatter) {
    match cmd {
        CapsCmd::Add(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.add_caps(&req) {
                fail(format!("could not add caps: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
        CapsCmd::Rm(args) => {
            let req = args.to_request().unwrap_or_else(|e| fail(e));
            if let Err(e) = users.remove_caps(&req) {
                fail(format!("could not remove caps: {}", e));
            }
            show_user_info(users, &args.uid, f);
        }
    }
}

async fn list_buckets(backend: &FilesystemBackend, uid: &Option<String>, f: &mut dyn Formatter) {
    f.open_array_section("buckets");
    let names = match uid {
        Some(uid) => backend.user_buckets(uid).await,
        None => backend.list_bucket_names().await,
    };
    match names {
        Ok(names) => {
            for name in names {
                f.dump_string("bucket", &name);
            }
        }
        Err(e) => fail(format!("list buckets: {}", e)),
    }
    f.close_section();
    flush(f);
}

async fn run_bucket_cmd(
    cmd: BucketCmd,
    backend: &FilesystemBackend,
    users: &UserDb,
    f: &mut dyn Formatter,
) {
    match cmd {
        BucketCmd::List { uid } => list_buckets(backend, &uid, f).await,
        BucketCmd::Link { uid, bucket } => {
            if let Err(e) = bucket_admin::link(backend, users, &uid, &bucket).await {
                fail(format!("error linking bucket to user: {}", e));
            }
        }
        BucketCmd::Unlink { uid, bucket } => {
            if let Err(e) = bucket_admin::unlink(backend, &uid, &bucket).await {
                fail(format!("error unlinking bucket: {}", e));
            }
        }
        BucketCmd::Stats { bucket, uid } => match (bucket, uid) {
            (Some(bucket), _) => {
                if let Err(e) = bucket_admin::dump_stats(backend, &bucket, f).await {
                    fail(format!("error getting bucket stats: {}", e));
                }
                flush(f);
            }
            (None, Some(uid)) => {
                let names = match backend.user_buckets(&uid).await {
                    Ok(n) => n,
                    Err(e) => fail(format!("could not get buckets for uid {}: {}", uid, e)),
                };
                f.open_array_section("buckets");
                for name in names {
                    if let Err(e) = bucket_admin::dump_stats(backend, &name, f).await {
                        fail(format!("error getting bucket stats: {}", e));
                    }
                }
                f.close_section();
                flush(f);
            }
            (None, None) => fail("either bucket or uid needs to be specified"),
        },
        BucketCmd::Rm {
            bucket,
            purge_objects,
        } => {
            if let Err(e) = bucket_admin::remove(backend, &bucket, purge_objects).await {
                fail(format!("bucket remove returned: {}", e));
            }
        }
        BucketCmd::Check { bucket, fix } => {
            if let Err(e) = bucket_admin::check_index(backend, &bucket, fix, f).await {
                fail(format!("failed to check index: {}", e));
            }
            flush(f);
        }
    }
}

async fn run_log_cmd(cmd: LogCmd, backend: &FilesystemBackend, f: &mut dyn Formatter) {
    match cmd {
        LogCmd::List { date } => {
            if let Some(d) = &date {
                if d.len() != 10 {
                    fail(format!("bad date format for '{}', expect YYYY-MM-DD", d));
                }
            }
            let names = match backend.list_logs(date.as_deref().unwrap_or("")).await {
                Ok(n) => n,
                Err(e) => fail(format!("log list: {}", e)),
            };
            f.open_array_section("logs");
            for name in names {
                f.dump_string("object", &name);
            }
            f.close_section();
            flush(f);
        }
        LogCmd::Show {
            object,
            date,
            bucket,
            bucket_id,
            show_log_entries,
            show_log_sum,
            skip_zero_entries,
        } => {
            let name = log_object_name(&object, &date, &bucket, &bucket_id);
            let entries = match backend.read_log(&name).await {
                Ok(e) => e,
                Err(e) => fail(format!("error opening log {}: {}", name, e)),
            };
            let show_entries = show_log_entries.unwrap_or(true);
            let show_sum = show_log_sum.unwrap_or(true);

            f.open_object_section("log");
            if let Some(first) = entries.first() {
                f.dump_string("bucket_id", &first.bucket_id);
                f.dump_string("bucket_owner", &first.bucket_owner);
                f.dump_string("bucket", &first.bucket);
            }

            let mut agg_time = 0u64;
            let mut agg_bytes_sent = 0u64;
            let mut agg_bytes_received = 0u64;
            let mut total_entries = 0u64;

            if show_entries {
                f.open_array_section("log_entries");
            }
            for entry in &entries {
                agg_time += entry.total_time_us;
                agg_bytes_sent += entry.bytes_sent;
                agg_bytes_received += entry.bytes_received;
                total_entries += 1;

                if skip_zero_entries && entry.bytes_sent == 0 && entry.bytes_received == 0 {
                    continue;
                }
                if show_entries {
                    f.open_object_section("log_entry");
                    f.dump_string("bucket", &entry.bucket);
                    f.dump_string("time", &entry.time.to_rfc3339());
                    f.dump_string("remote_addr", &entry.remote_addr);
                    f.dump_string("user", &entry.user);
                    f.dump_string("operation", &entry.op);
                    f.dump_string("uri", &entry.uri);
                    f.dump_string("http_status", &entry.http_status);
                    f.dump_string("error_code", &entry.error_code);
                    f.dump_int("bytes_sent", entry.bytes_sent as i64);
                    f.dump_int("bytes_received", entry.bytes_received as i64);
                    f.dump_int("object_size", entry.obj_size as i64);
                    f.dump_int("total_time", entry.total_time_us as i64);
                    f.dump_string("user_agent", &entry.user_agent);
                    f.dump_string("referrer", &entry.referrer);
                    f.close_section();
                }
            }
            if show_entries {
                f.close_section();
            }
            if show_sum {
                f.open_object_section("log_sum");
                f.dump_int("bytes_sent", agg_bytes_sent as i64);
                f.dump_int("bytes_received", agg_bytes_received as i64);
                f.dump_int("total_time", agg_time as i64);
                f.dump_int("total_entries", total_entries as i64);
                f.close_section();
            }
            f.close_section();
            flush(f);
        }
        LogCmd::Rm {
            object,
            date,
            bucket,
            bucket_id,
        } => {
            let name = log_object_name(&object, &date, &bucket, &bucket_id);
            if let Err(e) = backend.remove_log(&name).await {
                fail(format!("error removing log {}: {}", name, e));
            }
        }
    }
}

fn dump_usage_entry(key: &UsageKey, entry: &UsageEntry, f: &mut dyn Formatter) {
    f.open_object_section("entry");
    f.dump_string("user", &key.user);
    f.dump_int("epoch", key.epoch as i64);
    f.dump_string("category", &key.category);
    f.dump_int("bytes_sent", entry.bytes_sent as i64);
    f.dump_int("bytes_received", entry.bytes_received as i64);
    f.dump_int("ops", entry.ops as i64);
    f.dump_int("successful_ops", entry.successful_ops as i64);
    f.close_section();
}

async fn run_usage_cmd(cmd: UsageCmd, backend: &FilesystemBackend, f: &mut dyn Formatter) {
    match cmd {
        UsageCmd::Show {
            uid,
            start_date,
            end_date,
            categories,
            show_log_entries,
            show_log_sum,
        } => {
            let start = match &start_date {
                Some(d) => parse_admin_epoch(d)
                    .unwrap_or_else(|| fail("failed to parse start date")),
                None => 0,
            };
            let end = match &end_date {
                Some(d) => parse_admin_epoch(d).unwrap_or_else(|| fail("failed to parse end date")),
                None => u64::MAX,
            };
            let category_filter: Option<Vec<String>> = categories.map(|c| {
                c.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

            let records = match backend.read_usage(uid.as_deref(), start, end).await {
                Ok(r) => r,
                Err(e) => fail(format!("failed to show usage: {}", e)),
            };
            let records: Vec<_> = records
                .into_iter()
                .filter(|(k, _)| {
                    category_filter
                        .as_ref()
                        .map(|cats| cats.contains(&k.category))
                        .unwrap_or(true)
                })
                .collect();

            f.open_object_section("usage");
            if show_log_entries.unwrap_or(true) {
                f.open_array_section("entries");
                for (key, entry) in &records {
                    dump_usage_entry(key, entry, f);
                }
                f.close_section();
            }
            if show_log_sum.unwrap_or(true) {
                let mut total = UsageEntry::default();
                for (_, entry) in &records {
                    total.bytes_sent += entry.bytes_sent;
                    total.bytes_received += entry.bytes_received;
                    total.ops += entry.ops;
                    total.successful_ops += entry.successful_ops;
                }
                f.open_object_section("summary");
                f.dump_int("bytes_sent", total.bytes_sent as i64);
                f.dump_int("bytes_received", total.bytes_received as i64);
                f.dump_int("ops", total.ops as i64);
                f.dump_int("successful_ops", total.successful_ops as i64);
                f.close_section();
            }
            f.close_section();
            flush(f);
        }
        UsageCmd::Trim {
            uid,
            start_date,
            end_date,
            yes_i_really_mean_it,
        } => {
            if uid.is_none() && !yes_i_really_mean_it {
                eprintln!("usage trim without user specified will remove *all* users data");
                eprintln!("do you really mean it? (requires --yes-i-really-mean-it)");
                std::process::exit(1);
            }
            let start = match &start_date {
                Some(d) => parse_admin_epoch(d)
                    .unwrap_or_else(|| fail("failed to parse start date")),
                None => 0,
            };
            let end = match &end_date {
                Some(d) => parse_admin_epoch(d).unwrap_or_else(|| fail("failed to parse end date")),
                None => u64::MAX,
            };
            if let Err(e) = backend.trim_usage(uid.as_deref(), start, end).await {
                fail(format!("failed to trim usage: {}", e));
            }
        }
    }
}

async fn run_gc_cmd(cmd: GcCmd, backend: &FilesystemBackend, f: &mut dyn Formatter) {
    match cmd {
        GcCmd::List => {
            f.open_array_section("entries");
            let mut marker = String::new();
            loop {
                let (entries, truncated) = match backend.list_gc(&marker, 1000).await {
                    Ok(r) => r,
                    Err(e) => fail(format!("failed to list gc objects: {}", e)),
                };
                for entry in &entries {
                    f.open_object_section("chain_info");
                    f.dump_string("tag", &entry.tag);
                    f.dump_string("time", &entry.time.to_rfc3339());
                    f.open_array_section("objs");
                    for obj in &entry.objs {
                        f.dump_string("obj", obj);
                    }
                    f.close_section();
                    f.close_section();
                    flush(f);
                }
                match entries.last() {
                    Some(last) if truncated => marker = last.tag.clone(),
                    _ => break,
                }
            }
            f.close_section();
            flush(f);
        }
        GcCmd::Process => {
            if let Err(e) = backend.process_gc().await {
                fail(format!("gc processing returned error: {}", e));
            }
        }
    }
}
