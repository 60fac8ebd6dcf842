//! Page-side collector scripts
//!
//! Every script is a self-invoking expression so it can be passed straight to
//! a `Runtime.evaluate` style call. The collector lives at `window.__quiesce__`
//! and disappears on navigation, which is what the alive probe detects.
//!
//! Status reads never change collector state. The layout baseline is taken at
//! injection and refreshed by a timer inside the page; each read compares a
//! fresh sample against that baseline.

/// Installs the collector; a no-op returning `true` when already present
pub const INSTRUMENTATION_SCRIPT: &str = r#"(function () {
  if (window.__quiesce__ && window.__quiesce__._initialized) {
    return true;
  }

  var MUTATION_WINDOW_MS = 1000;
  var MUTATION_HISTORY_LIMIT = 500;
  var LAYOUT_SAMPLE_LIMIT = 50;
  var LAYOUT_TOLERANCE_PX = 1;
  var LAYOUT_SAMPLE_INTERVAL_MS = 100;

  var state = {
    pending: {},
    nextRequestId: 0,
    lastMutationTime: Date.now(),
    mutationTimes: [],
    activeAnimations: 0,
    layoutSnapshot: [],
    layoutMoved: false
  };

  function recordMutation() {
    var at = Date.now();
    state.lastMutationTime = at;
    state.mutationTimes.push(at);
    var cutoff = at - MUTATION_WINDOW_MS;
    while (
      state.mutationTimes.length > MUTATION_HISTORY_LIMIT ||
      (state.mutationTimes.length > 0 && state.mutationTimes[0] < cutoff)
    ) {
      state.mutationTimes.shift();
    }
  }

  var observer = new MutationObserver(function (records) {
    if (records.length > 0) {
      recordMutation();
    }
  });

  function observe(root) {
    try {
      observer.observe(root, {
        childList: true,
        subtree: true,
        attributes: true,
        characterData: true
      });
    } catch (e) {
      // detached or closed roots cannot be observed
    }
  }

  var originalAttachShadow = Element.prototype.attachShadow;
  if (originalAttachShadow) {
    Element.prototype.attachShadow = function () {
      var root = originalAttachShadow.apply(this, arguments);
      observe(root);
      return root;
    };
  }

  function beginRequest(url, method) {
    state.nextRequestId += 1;
    var id = state.nextRequestId;
    state.pending[id] = {
      url: String(url || ''),
      method: String(method || 'GET').toUpperCase(),
      started_at: Date.now()
    };
    return id;
  }

  function endRequest(id) {
    delete state.pending[id];
  }

  if (typeof window.fetch === 'function') {
    var originalFetch = window.fetch;
    window.fetch = function (input, init) {
      var url = (input && input.url) || input;
      var method = (init && init.method) || (input && input.method) || 'GET';
      var id = beginRequest(url, method);
      try {
        return originalFetch.apply(this, arguments).then(
          function (response) {
            endRequest(id);
            return response;
          },
          function (error) {
            endRequest(id);
            throw error;
          }
        );
      } catch (e) {
        endRequest(id);
        throw e;
      }
    };
  }

  var originalOpen = XMLHttpRequest.prototype.open;
  var originalSend = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.open = function (method, url) {
    this.__quiesceRequest = { method: method, url: url };
    return originalOpen.apply(this, arguments);
  };
  XMLHttpRequest.prototype.send = function () {
    var info = this.__quiesceRequest || { method: 'GET', url: '' };
    var id = beginRequest(info.url, info.method);
    this.addEventListener('loadend', function () {
      endRequest(id);
    });
    try {
      return originalSend.apply(this, arguments);
    } catch (e) {
      endRequest(id);
      throw e;
    }
  };

  function animationStarted() {
    state.activeAnimations += 1;
  }

  function animationEnded() {
    state.activeAnimations = Math.max(0, state.activeAnimations - 1);
  }

  document.addEventListener('animationstart', animationStarted, true);
  document.addEventListener('animationend', animationEnded, true);
  document.addEventListener('animationcancel', animationEnded, true);
  document.addEventListener('transitionstart', animationStarted, true);
  document.addEventListener('transitionend', animationEnded, true);
  document.addEventListener('transitioncancel', animationEnded, true);

  function activeAnimations() {
    if (typeof document.getAnimations === 'function') {
      return document.getAnimations().filter(function (animation) {
        return animation.playState === 'running';
      }).length;
    }
    return state.activeAnimations;
  }

  function mutationRate() {
    var cutoff = Date.now() - MUTATION_WINDOW_MS;
    var recent = state.mutationTimes.filter(function (at) {
      return at >= cutoff;
    });
    return recent.length * 1000 / MUTATION_WINDOW_MS;
  }

  function sampleLayout() {
    var elements = document.body ? document.body.querySelectorAll('*') : [];
    var rects = [];
    for (var i = 0; i < elements.length && rects.length < LAYOUT_SAMPLE_LIMIT; i++) {
      var rect = elements[i].getBoundingClientRect();
      if (rect.width > 0 || rect.height > 0) {
        rects.push([rect.top, rect.left, rect.width, rect.height]);
      }
    }
    return rects;
  }

  function layoutDiffers(previous, current) {
    if (previous.length !== current.length) {
      return true;
    }
    for (var i = 0; i < current.length; i++) {
      for (var k = 0; k < 4; k++) {
        if (Math.abs(current[i][k] - previous[i][k]) > LAYOUT_TOLERANCE_PX) {
          return true;
        }
      }
    }
    return false;
  }

  function refreshLayoutBaseline() {
    var current = sampleLayout();
    state.layoutMoved = layoutDiffers(state.layoutSnapshot, current);
    state.layoutSnapshot = current;
  }

  // read-only: movement since the last baseline, or during the last interval
  function layoutShifting() {
    return state.layoutMoved || layoutDiffers(state.layoutSnapshot, sampleLayout());
  }

  window.__quiesce__ = {
    _initialized: true,
    isAlive: function () {
      return true;
    },
    getStatus: function () {
      var details = Object.keys(state.pending).map(function (id) {
        return state.pending[id];
      });
      return {
        pending_requests: details.length,
        pending_request_details: details,
        last_mutation_time: state.lastMutationTime,
        mutation_rate: mutationRate(),
        active_animations: activeAnimations(),
        layout_shifting: layoutShifting()
      };
    }
  };

  observe(document.documentElement || document);
  document.querySelectorAll('*').forEach(function (element) {
    if (element.shadowRoot) {
      observe(element.shadowRoot);
    }
  });
  state.layoutSnapshot = sampleLayout();
  setInterval(refreshLayoutBaseline, LAYOUT_SAMPLE_INTERVAL_MS);
  return true;
})()"#;

/// `true` while the collector installed by [`INSTRUMENTATION_SCRIPT`] is present
pub const CHECK_ALIVE_SCRIPT: &str = r#"(function () {
  var collector = window.__quiesce__;
  return !!(collector && typeof collector.isAlive === 'function' && collector.isAlive());
})()"#;

/// Current telemetry payload, or `null` when the collector is missing
pub const GET_STATUS_SCRIPT: &str = r#"(function () {
  var collector = window.__quiesce__;
  if (!collector || typeof collector.getStatus !== 'function') {
    return null;
  }
  return collector.getStatus();
})()"#;
