//! The stack: a pipeline of worker threads connected by bounded queues.
//!
//! ```text
//! device poll -> ethernet -> arp
//!                         -> ip <-> icmp
//!                            ^
//!                            +---- Stack::sender()
//! ```
//!
//! The monitor is started before and stopped after every other worker.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{
    self,
    Receiver,
    Sender,
    TrySendError,
};

use crate::config::Config;
use crate::core::dev::DeviceRef;
use crate::core::message::{
    ArpRx,
    EthernetRx,
    IcmpRx,
    IpRx,
    IpTx,
};
use crate::core::monitor::{
    self,
    Health,
    Monitor,
    Reporter,
    Status,
};
use crate::core::service::ethernet::Dispatch;
use crate::core::service::{
    arp,
    ethernet,
    icmpv4,
    ipv4,
    Context,
};
use crate::core::worker::{
    Signal,
    Supervisor,
};
use crate::{
    Error,
    Result,
};

/// Tunables of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Longest a device poll blocks before checking for a stop.
    pub poll_timeout: Duration,
    /// Capacity of every inter-stage queue.
    pub queue_capacity: usize,
    /// Longest start() waits for every worker to run.
    pub startup_timeout: Duration,
    pub arp_sweep_interval: Duration,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            poll_timeout: Duration::from_millis(1000),
            queue_capacity: 8,
            startup_timeout: Duration::from_millis(5000),
            arp_sweep_interval: Duration::from_millis(1000),
        }
    }
}

const MONITOR_QUEUE_LEN: usize = 64;

pub struct Stack {
    ctx: Arc<Context>,
    settings: Settings,
    monitor: Arc<Monitor>,
    health_tx: Sender<Health>,
    health_rx: Receiver<Health>,
    monitor_worker: Option<Supervisor>,
    stages: Option<Supervisor>,
    ip_tx: Option<Sender<IpTx>>,
    opened: Vec<DeviceRef>,
}

impl Stack {
    /// Creates a stack over a context whose devices, interfaces and routes
    /// are already registered.
    pub fn new(ctx: Context, settings: Settings) -> Stack {
        let (health_tx, health_rx) = channel::bounded(MONITOR_QUEUE_LEN);

        Stack {
            ctx: Arc::new(ctx),
            settings,
            monitor: Arc::new(Monitor::new()),
            health_tx,
            health_rx,
            monitor_worker: None,
            stages: None,
            ip_tx: None,
            opened: Vec::new(),
        }
    }

    /// Creates a stack from a configuration. Nothing is opened until start().
    pub fn from_config(config: &Config) -> Result<Stack> {
        Ok(Stack::new(config.build_context()?, config.settings()))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Opens every device, spawns the workers and waits for all of them to
    /// report running.
    ///
    /// On failure everything started so far is stopped again.
    pub fn start(&mut self) -> Result<()> {
        if self.stages.is_some() {
            return Err(Error::AlreadyOpened);
        }

        match self.try_start() {
            Ok(()) => {
                info!("Stack is up with {} devices.", self.opened.len());
                Ok(())
            }
            Err(err) => {
                error!("Stack failed to start with {}.", err);
                self.stop();
                Err(err)
            }
        }
    }

    fn try_start(&mut self) -> Result<()> {
        if self.ctx.devices.devices().is_empty() {
            return Err(Error::Config("no devices registered".to_string()));
        }

        self.open_devices()?;
        self.spawn_workers()?;
        self.monitor.wait_green(self.settings.startup_timeout)
    }

    fn open_devices(&mut self) -> Result<()> {
        for dev in self.ctx.devices.devices() {
            dev.open()?;
            info!("Opened device {} ({}).", dev.name(), dev.addr());
            self.opened.push(dev);
        }
        Ok(())
    }

    fn reporter(&self, worker: &str) -> Reporter {
        self.monitor.register(worker);
        Reporter::new(worker, self.health_tx.clone())
    }

    fn spawn_workers(&mut self) -> Result<()> {
        let capacity = self.settings.queue_capacity;

        let mut monitor_worker = Supervisor::new();
        {
            let monitor = self.monitor.clone();
            let health_rx = self.health_rx.clone();
            let reporter = self.reporter("monitor");
            monitor_worker.spawn(reporter, move |signal| {
                monitor::run(&monitor, health_rx, &signal)
            })?;
        }
        self.monitor_worker = Some(monitor_worker);

        let (eth_tx, eth_rx) = channel::bounded::<EthernetRx>(capacity);
        let (arp_tx, arp_rx) = channel::bounded::<ArpRx>(capacity);
        let (ip_rx_tx, ip_rx_rx) = channel::bounded::<IpRx>(capacity);
        let (icmp_tx, icmp_rx) = channel::bounded::<IcmpRx>(capacity);
        let (ip_tx_tx, ip_tx_rx) = channel::bounded::<IpTx>(capacity);

        let mut stages = Supervisor::new();

        for dev in self.opened.iter() {
            let reporter = self.reporter(&format!("poll-{}", dev.name()));
            let (dev, eth_tx) = (dev.clone(), eth_tx.clone());
            let timeout = self.settings.poll_timeout;
            stages.spawn(reporter, move |signal| {
                poll_loop(&dev, timeout, &eth_tx, &signal)
            })?;
        }
        drop(eth_tx);

        stages.spawn(self.reporter("ethernet"), move |signal| {
            ethernet_loop(&eth_rx, &arp_tx, &ip_rx_tx, &signal)
        })?;

        {
            let ctx = self.ctx.clone();
            stages.spawn(self.reporter("arp"), move |signal| {
                arp_loop(&ctx, &arp_rx, &signal)
            })?;
        }

        {
            let ctx = self.ctx.clone();
            stages.spawn(self.reporter("ip"), move |signal| {
                ip_loop(&ctx, &ip_rx_rx, &ip_tx_rx, &icmp_tx, &signal)
            })?;
        }

        {
            let ctx = self.ctx.clone();
            let ip_tx = ip_tx_tx.clone();
            stages.spawn(self.reporter("icmp"), move |signal| {
                icmp_loop(&ctx, &icmp_rx, &ip_tx, &signal)
            })?;
        }

        {
            let ctx = self.ctx.clone();
            let interval = self.settings.arp_sweep_interval;
            stages.spawn(self.reporter("arp-sweep"), move |signal| {
                sweep_loop(&ctx, interval, &signal)
            })?;
        }

        self.stages = Some(stages);
        self.ip_tx = Some(ip_tx_tx);
        Ok(())
    }

    /// Stops every worker, closes the devices and finally stops the monitor.
    pub fn stop(&mut self) {
        self.ip_tx = None;

        if let Some(mut stages) = self.stages.take() {
            info!("Stopping stack.");
            stages.stop();
        }

        for dev in self.opened.drain(..) {
            if let Err(err) = dev.close() {
                warn!("Error closing device {} with {}.", dev.name(), err);
            }
        }

        if let Some(mut monitor_worker) = self.monitor_worker.take() {
            monitor_worker.stop();
        }
    }

    /// Returns the aggregated health of the workers.
    pub fn status(&self) -> Status {
        self.monitor.status()
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Returns a queue for sending IPv4 packets, once started.
    pub fn sender(&self) -> Option<Sender<IpTx>> {
        self.ip_tx.clone()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Logs a failed unit of work. Only errors a stage can't recover from are
/// passed on.
fn drop_work(stage: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => Err(err),
        Err(err @ Error::InvalidPacket)
        | Err(err @ Error::InvalidProtocolVersion(_))
        | Err(err @ Error::ChecksumMismatch)
        | Err(err @ Error::TtlExpired)
        | Err(err @ Error::UnsupportedProtocol(_))
        | Err(err @ Error::InterfaceNotFound)
        | Err(err @ Error::RouteNotFound)
        | Err(err @ Error::ArpIncomplete)
        | Err(err @ Error::NetworkAddressNotMatch) => {
            debug!("Stage {} dropped work with {:?}.", stage, err);
            Ok(())
        }
        Err(err) => {
            warn!("Stage {} dropped work with {}.", stage, err);
            Ok(())
        }
    }
}

/// Blocks until msg is queued or the worker is stopped. Returns false on
/// stop.
fn forward<M>(tx: &Sender<M>, msg: M, signal: &Signal) -> Result<bool> {
    select! {
        send(tx, msg) -> res => match res {
            Ok(()) => Ok(true),
            Err(_) if signal.is_stopped() => Ok(false),
            Err(_) => Err(Error::ChannelClosed),
        },
        recv(signal.receiver()) -> _ => Ok(false),
    }
}

/// Maps a closed work queue to a stop when the worker is stopping anyway.
fn closed(signal: &Signal) -> Result<()> {
    if signal.is_stopped() {
        Ok(())
    } else {
        Err(Error::ChannelClosed)
    }
}

fn poll_loop(
    dev: &DeviceRef,
    timeout: Duration,
    eth_tx: &Sender<EthernetRx>,
    signal: &Signal,
) -> Result<()> {
    while !signal.is_stopped() {
        let frame = match dev.poll(timeout) {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(Error::Interrupted) => continue,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                debug!("Dropping frame on {} with {:?}.", dev.name(), err);
                continue;
            }
        };

        let msg = EthernetRx {
            ethertype: frame.header.ethertype,
            payload: frame.payload,
            dev: dev.clone(),
        };

        if !forward(eth_tx, msg, signal)? {
            break;
        }
    }

    Ok(())
}

fn ethernet_loop(
    eth_rx: &Receiver<EthernetRx>,
    arp_tx: &Sender<ArpRx>,
    ip_tx: &Sender<IpRx>,
    signal: &Signal,
) -> Result<()> {
    loop {
        let frame = select! {
            recv(signal.receiver()) -> _ => return Ok(()),
            recv(eth_rx) -> frame => match frame {
                Ok(frame) => frame,
                Err(_) => return closed(signal),
            },
        };

        let queued = match ethernet::recv_frame(frame) {
            Some(Dispatch::Arp(msg)) => forward(arp_tx, msg, signal)?,
            Some(Dispatch::Ip(msg)) => forward(ip_tx, msg, signal)?,
            None => true,
        };

        if !queued {
            return Ok(());
        }
    }
}

fn arp_loop(ctx: &Context, arp_rx: &Receiver<ArpRx>, signal: &Signal) -> Result<()> {
    loop {
        select! {
            recv(signal.receiver()) -> _ => return Ok(()),
            recv(arp_rx) -> msg => match msg {
                Ok(msg) => drop_work("arp", arp::recv_packet(ctx, &msg))?,
                Err(_) => return closed(signal),
            },
        }
    }
}

fn ip_loop(
    ctx: &Context,
    ip_rx: &Receiver<IpRx>,
    ip_tx: &Receiver<IpTx>,
    icmp_tx: &Sender<IcmpRx>,
    signal: &Signal,
) -> Result<()> {
    loop {
        select! {
            recv(signal.receiver()) -> _ => return Ok(()),
            recv(ip_rx) -> msg => {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(_) => return closed(signal),
                };

                match ipv4::recv_packet(ctx, &msg) {
                    Ok(Some(icmp)) => {
                        if !forward(icmp_tx, icmp, signal)? {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => drop_work("ip", Err(err))?,
                }
            },
            recv(ip_tx) -> msg => match msg {
                Ok(msg) => drop_work("ip", ipv4::send_packet(ctx, &msg))?,
                Err(_) => return closed(signal),
            },
        }
    }
}

fn icmp_loop(
    ctx: &Context,
    icmp_rx: &Receiver<IcmpRx>,
    ip_tx: &Sender<IpTx>,
    signal: &Signal,
) -> Result<()> {
    loop {
        let msg = select! {
            recv(signal.receiver()) -> _ => return Ok(()),
            recv(icmp_rx) -> msg => match msg {
                Ok(msg) => msg,
                Err(_) => return closed(signal),
            },
        };

        let reply = match icmpv4::recv_packet(ctx, &msg) {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(err) => {
                drop_work("icmp", Err(err))?;
                continue;
            }
        };

        // The IP stage may itself be blocked handing work to this stage, so
        // replies are dropped rather than waited on when its queue is full.
        match ip_tx.try_send(reply) {
            Ok(()) => {}
            Err(TrySendError::Full(reply)) => {
                warn!("IP queue full, dropping ICMP reply to {}.", reply.dst);
            }
            Err(TrySendError::Disconnected(_)) => return closed(signal),
        }
    }
}

fn sweep_loop(ctx: &Context, interval: Duration, signal: &Signal) -> Result<()> {
    let ticker = channel::tick(interval);

    loop {
        select! {
            recv(signal.receiver()) -> _ => return Ok(()),
            recv(ticker) -> _ => {
                let cleared = arp::sweep(ctx);
                if !cleared.is_empty() {
                    info!("Swept {} expired ARP entries.", cleared.len());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::dev::Loopback;
    use crate::core::repo::Iface;
    use crate::core::repr::Ipv4Address;

    fn settings() -> Settings {
        Settings {
            poll_timeout: Duration::from_millis(10),
            queue_capacity: 4,
            startup_timeout: Duration::from_secs(5),
            arp_sweep_interval: Duration::from_millis(10),
        }
    }

    fn loopback_ctx() -> Context {
        let ctx = Context::new(Duration::from_secs(60));
        let dev: DeviceRef = Arc::new(Loopback::new("lo"));
        ctx.devices.register_device(dev.clone()).unwrap();
        let iface = ctx
            .ifaces
            .register_interface(Iface::new(
                Ipv4Address::new([127, 0, 0, 1]),
                Ipv4Address::netmask(8),
                &dev,
            ))
            .unwrap();
        ctx.routes
            .register_route(
                iface.network(),
                iface.netmask,
                Ipv4Address::UNSPECIFIED,
                &iface,
            )
            .unwrap();
        ctx
    }

    #[test]
    fn test_start_and_stop() {
        let mut stack = Stack::new(loopback_ctx(), settings());
        assert!(stack.sender().is_none());

        stack.start().unwrap();
        assert_eq!(stack.status(), Status::Green);
        assert!(stack.sender().is_some());
        assert_matches!(stack.start(), Err(Error::AlreadyOpened));

        stack.stop();
        assert!(stack.sender().is_none());
        assert_ne!(stack.status(), Status::Green);

        let dev = stack.context().devices.get("lo").unwrap();
        assert!(!dev.is_up());
    }

    #[test]
    fn test_start_fails_when_device_is_up() {
        let ctx = loopback_ctx();
        ctx.devices.get("lo").unwrap().open().unwrap();

        let mut stack = Stack::new(ctx, settings());
        assert_matches!(stack.start(), Err(Error::AlreadyOpened));
        assert!(stack.sender().is_none());
    }

    #[test]
    fn test_start_without_devices() {
        let mut stack = Stack::new(Context::new(Duration::from_secs(60)), settings());
        assert_matches!(stack.start(), Err(Error::Config(_)));
    }

    #[test]
    fn test_drop_work() {
        assert_matches!(drop_work("test", Err(Error::ChecksumMismatch)), Ok(()));
        assert_matches!(drop_work("test", Err(Error::PacketTooLong)), Ok(()));
        assert_matches!(
            drop_work("test", Err(Error::ChannelClosed)),
            Err(Error::ChannelClosed)
        );
    }
}
